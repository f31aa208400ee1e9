use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::errors::busy_resource;

/// A permit held for the dynamic extent of one admitted call. Dropping it
/// releases the semaphore on every exit path, including panics.
pub struct RequestPermit<'a>(#[allow(dead_code)] SemaphorePermit<'a>);
pub struct WorkbookPermit(#[allow(dead_code)] tokio::sync::OwnedSemaphorePermit);

/// Two weighted semaphores bounding in-flight requests and simultaneously
/// open workbooks, each with a bounded-wait acquire that surfaces
/// `BUSY_RESOURCE` on timeout rather than blocking indefinitely.
pub struct AdmissionController {
    requests: Semaphore,
    workbooks: Arc<Semaphore>,
    admission_wait: Duration,
}

impl AdmissionController {
    pub fn new(max_concurrent_requests: usize, max_open_workbooks: usize, admission_wait: Duration) -> Self {
        Self {
            requests: Semaphore::new(max_concurrent_requests),
            workbooks: Arc::new(Semaphore::new(max_open_workbooks)),
            admission_wait,
        }
    }

    pub async fn acquire_request(&self) -> Result<RequestPermit<'_>> {
        match tokio::time::timeout(self.admission_wait, self.requests.acquire()).await {
            Ok(Ok(permit)) => Ok(RequestPermit(permit)),
            Ok(Err(_closed)) => Err(busy_resource("request admission channel closed").into()),
            Err(_elapsed) => Err(busy_resource(format!(
                "no request slot available within {:?}",
                self.admission_wait
            ))
            .into()),
        }
    }

    pub async fn acquire_workbook(&self) -> Result<WorkbookPermit> {
        let workbooks = self.workbooks.clone();
        match tokio::time::timeout(self.admission_wait, workbooks.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(WorkbookPermit(permit)),
            Ok(Err(_closed)) => Err(busy_resource("workbook admission channel closed").into()),
            Err(_elapsed) => Err(busy_resource(format!(
                "no workbook slot available within {:?}",
                self.admission_wait
            ))
            .into()),
        }
    }

    #[cfg(test)]
    pub fn available_workbook_permits(&self) -> usize {
        self.workbooks.available_permits()
    }
}
