//! Connection-scoped context
//!
//! A session ties one management API handle to its own scheduler and
//! subscriber set. Providers bind to a session and compare session ids to
//! notice when the context underneath them has changed.

use crate::api::ManagementApi;
use crate::error::SchedulerError;
use crate::scheduler::Scheduler;
use crate::subscriber::Subscribers;
use fabric_monitor_types::EngineConfig;
use log::info;
use std::sync::Arc;
use uuid::Uuid;

pub struct Session {
    id: Uuid,
    api: Arc<dyn ManagementApi>,
    scheduler: Arc<Scheduler>,
    subscribers: Subscribers,
}

impl Session {
    /// Open a session with a fresh background pool sized by `config`
    pub fn connect(
        api: Arc<dyn ManagementApi>,
        config: &EngineConfig,
    ) -> Result<Arc<Self>, SchedulerError> {
        let scheduler = Arc::new(Scheduler::new(config)?);
        Ok(Self::with_scheduler(api, scheduler))
    }

    /// Open a session on an existing scheduler
    pub fn with_scheduler(api: Arc<dyn ManagementApi>, scheduler: Arc<Scheduler>) -> Arc<Self> {
        let id = Uuid::new_v4();
        let subscribers = Subscribers::new(Arc::clone(&api), Arc::clone(&scheduler));
        info!("Session {} connected", id);
        Arc::new(Self {
            id,
            api,
            scheduler,
            subscribers,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn api(&self) -> &Arc<dyn ManagementApi> {
        &self.api
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }

    pub fn is_connected(&self) -> bool {
        !self.scheduler.is_shut_down()
    }

    /// Restart every live task after the underlying connection was
    /// re-established, so no execution from the dead connection survives.
    pub fn reconnect(&self) -> Result<(), SchedulerError> {
        if !self.is_connected() {
            return Err(SchedulerError::ShutDown);
        }
        info!("Session {} reconnected", self.id);
        self.subscribers.reschedule_tasks();
        Ok(())
    }

    /// Cancel all work and stop the pool. Idempotent.
    pub fn disconnect(&self) {
        if self.is_connected() {
            info!("Session {} disconnecting", self.id);
        }
        self.scheduler.shutdown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .field("tasks", &self.subscribers.task_count())
            .finish()
    }
}
