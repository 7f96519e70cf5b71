use crate::resource_unit::ResourceUnit;
use std::fmt;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Progress of one dispatched chunk query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unknown,
    Provision,
    ProvisionError,
    Request,
    ResponseData,
    ResponseDone,
    ResultError,
    MergeOk,
    MergeError,
    Cancel,
}

/// Last reported state with its code and description.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusInfo {
    pub state: State,
    pub code: i32,
    pub description: String,
    pub timestamp: SystemTime,
}

/// Status of one reference number, updated from dispatch and transport threads.
#[derive(Debug)]
pub struct ExecStatus {
    resource: ResourceUnit,
    info: Mutex<StatusInfo>,
}

impl ExecStatus {
    pub fn new(resource: ResourceUnit) -> Self {
        ExecStatus {
            resource,
            info: Mutex::new(StatusInfo {
                state: State::Unknown,
                code: 0,
                description: String::new(),
                timestamp: SystemTime::now(),
            }),
        }
    }

    pub fn resource(&self) -> &ResourceUnit {
        &self.resource
    }

    /// Records a new state.
    ///
    /// # Arguments
    ///
    /// * `state` - New state.
    /// * `code` - Message code, 0 when there is none.
    /// * `description` - Free text, may be empty.
    pub fn report(&self, state: State, code: i32, description: &str) {
        let mut info = self.info.lock().unwrap();
        info.state = state;
        info.code = code;
        info.description = description.to_string();
        info.timestamp = SystemTime::now();
    }

    pub fn state(&self) -> State {
        self.info.lock().unwrap().state
    }

    pub fn info(&self) -> StatusInfo {
        self.info.lock().unwrap().clone()
    }
}

impl fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let info = self.info();
        let secs = info
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        write!(
            f,
            "{} {:?} code={} t={}",
            self.resource, info.state, info.code, secs
        )?;
        if !info.description.is_empty() {
            write!(f, " {}", info.description)?;
        }
        Ok(())
    }
}
