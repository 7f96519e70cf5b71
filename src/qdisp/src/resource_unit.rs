use common::{ChunkId, QservError};
use std::fmt;

/// Worker-side resource a chunk query is sent to: one chunk of one database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceUnit {
    pub db: String,
    pub chunk: ChunkId,
}

impl ResourceUnit {
    pub fn new(db: &str, chunk: ChunkId) -> Self {
        ResourceUnit {
            db: db.to_string(),
            chunk,
        }
    }

    /// Parses a `/chk/{db}/{chunk}` path.
    pub fn from_path(path: &str) -> Result<Self, QservError> {
        let parts: Vec<&str> = path.split('/').collect();
        match parts.as_slice() {
            ["", "chk", db, chunk] if !db.is_empty() => {
                let chunk = chunk.parse::<ChunkId>().map_err(|_| {
                    QservError::Dispatch(format!("Bad chunk in resource path {}", path))
                })?;
                Ok(ResourceUnit::new(db, chunk))
            }
            _ => Err(QservError::Dispatch(format!(
                "Bad resource path {}",
                path
            ))),
        }
    }

    pub fn path(&self) -> String {
        format!("/chk/{}/{}", self.db, self.chunk)
    }
}

impl fmt::Display for ResourceUnit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path() {
        let ru = ResourceUnit::new("LSST", 1234);
        assert_eq!("/chk/LSST/1234", ru.path());
        assert_eq!(ru, ResourceUnit::from_path("/chk/LSST/1234").unwrap());
        assert!(ResourceUnit::from_path("/chk/LSST/abc").is_err());
        assert!(ResourceUnit::from_path("/result/LSST/1").is_err());
        assert!(ResourceUnit::from_path("/chk//1").is_err());
    }
}
