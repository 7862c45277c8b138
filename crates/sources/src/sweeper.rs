//! Background thread advancing a simulated fabric at its sweep interval

use crate::fabric::SimulatedFabric;
use crossbeam::channel::{bounded, select, tick, Sender};
use log::{debug, info};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Running sweeper; stops when dropped
pub struct Sweeper {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<u64>>,
}

impl Sweeper {
    /// Stop the sweeper and return the number of sweeps it took
    pub fn stop(mut self) -> u64 {
        self.halt()
    }

    fn halt(&mut self) -> u64 {
        // Dropping the sender wakes the thread
        self.stop.take();
        self.thread
            .take()
            .and_then(|thread| thread.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.halt();
    }
}

pub fn spawn_sweeper(fabric: Arc<SimulatedFabric>) -> io::Result<Sweeper> {
    let interval = Duration::from_millis(fabric.config().sweep_interval_ms.max(1));
    let (stop_tx, stop_rx) = bounded::<()>(0);

    let thread = thread::Builder::new()
        .name("fabric-sweeper".to_string())
        .spawn(move || {
            let ticker = tick(interval);
            let mut sweeps = 0;
            loop {
                select! {
                    recv(ticker) -> _ => {
                        let image_id = fabric.advance_sweep();
                        sweeps += 1;
                        debug!("Simulated sweep {}", image_id);
                    }
                    recv(stop_rx) -> _ => break,
                }
            }
            sweeps
        })?;

    info!("Sweeper started, interval {:?}", interval);
    Ok(Sweeper {
        stop: Some(stop_tx),
        thread: Some(thread),
    })
}
