use common::{Facade, QservError, RefNum};
use qdisp::{Executive, ExecutiveConfig, MessageStore, QueryMessage, ResourceUnit, ResultReceiver, Spec, TableMerger, Transport};
use qproc::{ChunkSpec, QuerySession};
use std::fmt;
use std::sync::Arc;

/// Final state of a user query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Success,
    Error,
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryState::Success => write!(f, "SUCCESS"),
            QueryState::Error => write!(f, "ERROR"),
        }
    }
}

/// One user query from planning to merged result.
pub struct UserQuery {
    session: QuerySession,
    executive: Arc<Executive>,
    merger: Arc<TableMerger>,
    messages: Arc<MessageStore>,
    buffer_size: usize,
    sequence: RefNum,
}

impl UserQuery {
    /// Plans `sql`.
    ///
    /// # Arguments
    ///
    /// * `facade` - Catalog.
    /// * `default_db` - Database of unqualified table names.
    /// * `sql` - Query text.
    /// * `config` - Executive settings.
    /// * `transport` - Carries chunk queries to workers.
    /// * `buffer_size` - Receive buffer size per chunk query.
    pub fn new(
        facade: Arc<dyn Facade>,
        default_db: &str,
        sql: &str,
        config: ExecutiveConfig,
        transport: Arc<dyn Transport>,
        buffer_size: usize,
    ) -> Result<Self, QservError> {
        let mut session = QuerySession::new(facade, default_db);
        session.set_query(sql)?;
        let messages = Arc::new(MessageStore::new());
        let merger = Arc::new(TableMerger::new(None));
        let executive = Executive::new(config, transport, messages.clone(), merger.clone());
        Ok(UserQuery {
            session,
            executive,
            merger,
            messages,
            buffer_size,
            sequence: 0,
        })
    }

    pub fn session(&self) -> &QuerySession {
        &self.session
    }

    pub fn add_chunk(&mut self, cs: ChunkSpec) -> Result<(), QservError> {
        self.session.add_chunk(cs)
    }

    /// Dispatches one request per chunk. Returns how many were dispatched.
    ///
    /// Stops at the first refused dispatch; the failure is already recorded
    /// and `join` reports it.
    pub fn submit(&mut self) -> Result<usize, QservError> {
        let result_table = self.session.result_table();
        let session_id = self.session.session_id();
        let mut count = 0;
        let specs: Vec<_> = self.session.chunk_queries().collect();
        for cqs in specs {
            let request = cqs.to_task_msg(session_id, &result_table).encode()?;
            let receiver = Arc::new(ResultReceiver::new(
                self.merger.clone(),
                &result_table,
                self.buffer_size,
            ));
            self.sequence += 1;
            let spec = Spec {
                resource: ResourceUnit::new(&cqs.db, cqs.chunk_id),
                request,
                receiver,
            };
            debug!("Submitting {}", cqs);
            if let Err(e) = self.executive.add(self.sequence, spec) {
                warn!("Dispatch of {} stopped: {}", cqs, e);
                break;
            }
            count += 1;
        }
        info!("{} dispatched {} chunk queries", session_id, count);
        Ok(count)
    }

    pub fn join(&self) -> QueryState {
        if self.executive.join() {
            info!("Joined everything (success)");
            QueryState::Success
        } else {
            error!("Joined everything (failure!)");
            QueryState::Error
        }
    }

    pub fn abort(&self) {
        self.executive.abort();
    }

    /// Merged result rows.
    pub fn rows(&self) -> Vec<Vec<String>> {
        self.merger.rows(&self.session.result_table())
    }

    pub fn messages(&self) -> Vec<QueryMessage> {
        self.messages.messages()
    }

    pub fn exec_desc(&self) -> String {
        self.executive.progress_desc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{EchoRunner, LoopbackTransport};
    use common::testutil::{init, test_facade};
    use qdisp::message_store::{MSG_MERGED, MSG_MGR_ADD};
    use qproc::DUMMY_CHUNK;
    use std::time::Duration;
    use wsched::{BlendScheduler, Foreman, ForemanConfig};

    fn worker() -> Arc<Foreman> {
        init();
        let foreman = Arc::new(Foreman::new(
            ForemanConfig { pool_size: 2 },
            Arc::new(BlendScheduler::with_max_running(2)),
            Arc::new(EchoRunner),
        ));
        foreman.start();
        foreman
    }

    fn user_query(foreman: &Arc<Foreman>, sql: &str) -> UserQuery {
        let config = ExecutiveConfig {
            join_wait: Duration::from_millis(100),
            ..ExecutiveConfig::default()
        };
        UserQuery::new(
            Arc::new(test_facade()),
            "LSST",
            sql,
            config,
            Arc::new(LoopbackTransport::new(foreman.clone())),
            1024,
        )
        .unwrap()
    }

    #[test]
    fn test_near_neighbor_end_to_end() {
        let foreman = worker();
        let mut uq = user_query(
            &foreman,
            "SELECT a.objectId, b.objectId FROM Object AS a, Object AS b \
             WHERE scisql_angSep(a.ra, a.dec, b.ra, b.dec) < 0.01 AND a.objectId <> b.objectId",
        );
        for chunk in &[100, 101, 102] {
            uq.add_chunk(ChunkSpec::new(*chunk, vec![1, 2])).unwrap();
        }
        assert_eq!(3, uq.submit().unwrap());
        assert_eq!(QueryState::Success, uq.join());
        foreman.shutdown();
        // 3 chunks, 2 subchunks, 2 templates
        let rows = uq.rows();
        assert_eq!(12, rows.len());
        assert!(rows
            .iter()
            .any(|r| r[0] == "101" && r[1] == "2" && r[2].contains("ObjectFullOverlap_101_2")));
        let messages = uq.messages();
        assert_eq!(3, messages.iter().filter(|m| m.code == MSG_MGR_ADD).count());
        assert_eq!(3, messages.iter().filter(|m| m.code == MSG_MERGED).count());
        assert!(uq.exec_desc().contains("Ref=1 /chk/LSST/100 ResponseDone"));
    }

    #[test]
    fn test_replicated_only() {
        let foreman = worker();
        let mut uq = user_query(&foreman, "SELECT filterName FROM Filter");
        assert_eq!(1, uq.submit().unwrap());
        assert_eq!(QueryState::Success, uq.join());
        foreman.shutdown();
        let rows = uq.rows();
        assert_eq!(1, rows.len());
        assert_eq!(DUMMY_CHUNK.to_string(), rows[0][0]);
    }

    #[test]
    fn test_worker_gone() {
        let foreman = worker();
        let mut uq = user_query(&foreman, "SELECT objectId FROM Object WHERE flux > 3");
        uq.add_chunk(ChunkSpec::whole(7)).unwrap();
        uq.add_chunk(ChunkSpec::whole(8)).unwrap();
        foreman.shutdown();
        assert_eq!(0, uq.submit().unwrap());
        assert_eq!(QueryState::Error, uq.join());
        assert!(uq.rows().is_empty());
    }

    #[test]
    fn test_rejected_plan() {
        let foreman = worker();
        let res = UserQuery::new(
            Arc::new(test_facade()),
            "LSST",
            "SELECT * FROM Filter AS f LEFT JOIN Object AS o ON f.filterId = o.objectId",
            ExecutiveConfig::default(),
            Arc::new(LoopbackTransport::new(foreman.clone())),
            1024,
        );
        match res {
            Err(QservError::Analysis(_)) => {}
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("plan accepted"),
        }
        foreman.shutdown();
    }
}
