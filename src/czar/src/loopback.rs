use common::task_msg::TaskMsg;
use common::QservError;
use qdisp::message_store::MSG_XRD_READ;
use qdisp::{ResourceUnit, ResultReceiver, Transport};
use std::io::{self, Write};
use std::sync::Arc;
use wsched::{Foreman, Task, TaskRunner, TaskSink};

/// Delivers requests to a worker `Foreman` in the same process.
pub struct LoopbackTransport {
    foreman: Arc<Foreman>,
}

impl LoopbackTransport {
    pub fn new(foreman: Arc<Foreman>) -> Self {
        LoopbackTransport { foreman }
    }
}

impl Transport for LoopbackTransport {
    fn provision(
        &self,
        resource: &ResourceUnit,
        request: Vec<u8>,
        receiver: Arc<ResultReceiver>,
    ) -> Result<(), QservError> {
        let msg = TaskMsg::decode(&request)?;
        if msg.db != resource.db || msg.chunk_id != resource.chunk {
            return Err(QservError::Dispatch(format!(
                "Request for {}:{} sent to {}",
                msg.db, msg.chunk_id, resource
            )));
        }
        debug!("Loopback provision {} ({} queries)", resource, msg.query_count());
        let sink = ReceiverSink {
            receiver: receiver.clone(),
        };
        let task = self.foreman.accept(msg, Box::new(sink))?;
        receiver.set_cancel_fn(Box::new(move || task.squash()));
        Ok(())
    }
}

/// Streams task output into a result receiver.
struct ReceiverSink {
    receiver: Arc<ResultReceiver>,
}

impl Write for ReceiverSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = {
            let mut window = self.receiver.buffer();
            let n = window.len().min(data.len());
            window[..n].copy_from_slice(&data[..n]);
            n
        };
        if !self.receiver.flush(n, false) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "result receiver closed",
            ));
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TaskSink for ReceiverSink {
    fn finish(self: Box<Self>, result: Result<(), QservError>) {
        match result {
            Ok(()) => {
                self.receiver.flush(0, true);
            }
            Err(QservError::Cancelled) => self.receiver.cancel(),
            Err(e) => self.receiver.error_flush(MSG_XRD_READ, &e.to_string()),
        }
    }
}

/// Worker runner that answers each query with one row naming it.
///
/// Rows are `chunk,subchunk,query` with subchunk -1 for chunk-level fragments.
pub struct EchoRunner;

impl TaskRunner for EchoRunner {
    fn run(&self, task: &Task, sink: &mut dyn Write) -> Result<(), QservError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(sink);
        for fragment in task.msg.fragments.iter() {
            let subchunk = fragment.subchunks.first().copied().unwrap_or(-1);
            for query in fragment.queries.iter() {
                if task.is_squashed() {
                    return Err(QservError::Cancelled);
                }
                writer.write_record(&[
                    task.chunk_id().to_string(),
                    subchunk.to_string(),
                    query.clone(),
                ])?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}
