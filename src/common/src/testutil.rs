use crate::catalog::{ChunkLevel, PartitionCols, Partitioning, Striping, TableName};
use crate::database::{DatabaseDef, MemFacade, TableDef};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn director(name: &str, level: ChunkLevel, pk: &str, partitioning_id: i32, cols: &[&str]) -> TableDef {
    TableDef {
        name: name.to_string(),
        chunk_level: level,
        columns: cols.iter().map(|c| c.to_string()).collect(),
        partition_cols: Some(PartitionCols {
            lon: String::from("ra"),
            lat: String::from("dec"),
            sec_index: pk.to_string(),
        }),
        partitioning: Partitioning::Director {
            pk: pk.to_string(),
            partitioning_id,
        },
    }
}

/// Builds the LSST fixture catalog.
///
/// * `Object` - subchunked director, key `objectId`, position `ra`/`dec`.
/// * `Source` - subchunked child of `Object` through `objectId`.
/// * `Object2` - subchunked director, key `id`, same partitioning as `Object`.
/// * `RefObjMatch` - match table pairing `Object2.id` (`refObjectId`) with `Object.objectId`.
/// * `Exposure` - chunked director with its own partitioning.
/// * `Filter` - replicated.
pub fn test_facade() -> MemFacade {
    let tables = vec![
        director(
            "Object",
            ChunkLevel::SubChunked,
            "objectId",
            1,
            &["objectId", "ra", "dec", "flux"],
        ),
        TableDef {
            name: String::from("Source"),
            chunk_level: ChunkLevel::SubChunked,
            columns: vec![
                String::from("sourceId"),
                String::from("objectId"),
                String::from("flux"),
            ],
            partition_cols: None,
            partitioning: Partitioning::Child {
                director: TableName::new("LSST", "Object"),
                fk: String::from("objectId"),
            },
        },
        director(
            "Object2",
            ChunkLevel::SubChunked,
            "id",
            1,
            &["id", "ra", "dec"],
        ),
        TableDef {
            name: String::from("RefObjMatch"),
            chunk_level: ChunkLevel::SubChunked,
            columns: vec![
                String::from("refObjectId"),
                String::from("objectId"),
                String::from("angSep"),
            ],
            partition_cols: None,
            partitioning: Partitioning::Match {
                directors: (
                    TableName::new("LSST", "Object2"),
                    TableName::new("LSST", "Object"),
                ),
                fks: (String::from("refObjectId"), String::from("objectId")),
            },
        },
        director(
            "Exposure",
            ChunkLevel::Chunked,
            "exposureId",
            2,
            &["exposureId", "ra", "dec"],
        ),
        TableDef::replicated("Filter", &["filterId", "filterName"]),
    ];
    MemFacade::new(vec![DatabaseDef {
        name: String::from("LSST"),
        striping: Striping {
            stripes: 85,
            sub_stripes: 12,
        },
        overlap: 0.02,
        tables,
    }])
}

pub fn get_random_byte_vec(n: usize) -> Vec<u8> {
    let random_bytes: Vec<u8> = (0..n).map(|_| rand::random::<u8>()).collect();
    random_bytes
}

pub fn gen_rand_string(n: usize) -> String {
    thread_rng().sample_iter(Alphanumeric).take(n).map(char::from).collect()
}

/// Generates `rows` newline-terminated CSV rows of `width` random alphanumeric fields.
pub fn gen_csv_rows(rows: usize, width: usize) -> Vec<u8> {
    let mut rng = thread_rng();
    let mut out = String::new();
    for _ in 0..rows {
        let fields: Vec<String> = (0..width)
            .map(|_| {
                let len = rng.gen_range(1..12);
                gen_rand_string(len)
            })
            .collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out.into_bytes()
}

/// Compares two collections ignoring order.
pub fn compare_unordered<T: PartialEq>(a: &[T], mut b: Vec<T>) -> bool {
    if a.len() != b.len() {
        return false;
    }
    for x in a {
        match b.iter().position(|y| y == x) {
            None => return false,
            Some(idx) => {
                b.swap_remove(idx);
            }
        }
    }
    b.is_empty()
}
