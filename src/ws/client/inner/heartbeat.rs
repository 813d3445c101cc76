use std::{
    future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};

/// Signal from heartbeat task to connection driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pulse {
    /// time to send a heartbeat with this sequence
    Beat { sequence: Option<u64> },
    /// last heartbeat was not acked before this tick
    Timeout,
}

#[derive(Debug, Clone, Copy)]
struct Control {
    interval: Duration,
    paused: bool,
    stopped: bool,
}

/// Periodic heartbeat scheduler bound to one gateway client.
///
/// It does not write to the socket itself, it tells the driver what to do
/// through the pulse channel.
#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    control: watch::Sender<Control>,
    acked: Arc<AtomicBool>,
    sequence: watch::Receiver<Option<u64>>,
    pulses: mpsc::Sender<Pulse>,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    pub fn new(sequence: watch::Receiver<Option<u64>>, pulses: mpsc::Sender<Pulse>) -> Self {
        let (control, _) = watch::channel(Control {
            interval: Duration::ZERO,
            paused: true,
            stopped: false,
        });

        Self {
            control,
            acked: Arc::new(AtomicBool::new(true)),
            sequence,
            pulses,
            handle: None,
        }
    }

    /// Start beating every `interval`, first beat after one interval.
    ///
    /// After a [`pause`](Self::pause) this resumes the same task with a fresh ack state.
    pub fn start(&mut self, interval: Duration) {
        self.control.send_modify(|control| control.interval = interval);
        self.resume(true);

        if self.handle.is_none() {
            log::debug!("Heartbeat task start, interval {:?}", interval);
            self.handle = Some(tokio::spawn(run(
                self.control.subscribe(),
                Arc::clone(&self.acked),
                self.sequence.clone(),
                self.pulses.clone(),
            )));
        }
    }

    /// Suspend beating, interval is kept
    pub fn pause(&self) {
        self.control.send_if_modified(|control| {
            let changed = !control.paused;
            control.paused = true;
            changed
        });
    }

    /// Continue beating with given ack state
    pub fn resume(&self, acked: bool) {
        self.acked.store(acked, Ordering::SeqCst);
        self.control.send_modify(|control| control.paused = false);
    }

    pub fn heartbeat_ack(&self) {
        log::trace!("Heartbeat acked");
        self.acked.store(true, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.control.borrow().paused
    }

    /// Stop the task and wait until it exits, calling it again does nothing
    pub async fn stop(&mut self) {
        self.control.send_modify(|control| control.stopped = true);

        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                log::warn!("Heartbeat task exit abnormally: {}", err);
            }
            log::debug!("Heartbeat task stopped");
        }
    }
}

fn deadline(control: &Control) -> Option<Instant> {
    if control.paused || control.stopped {
        None
    } else {
        Some(Instant::now() + control.interval)
    }
}

async fn run(
    mut control: watch::Receiver<Control>,
    acked: Arc<AtomicBool>,
    sequence: watch::Receiver<Option<u64>>,
    pulses: mpsc::Sender<Pulse>,
) {
    let initial = *control.borrow_and_update();
    if initial.stopped {
        return;
    }
    let mut next = deadline(&initial);

    loop {
        let tick = async move {
            match next {
                Some(at) => tokio::time::sleep_until(at).await,
                None => future::pending().await,
            }
        };

        tokio::select! {
            biased;

            changed = control.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *control.borrow_and_update();
                if current.stopped {
                    break;
                }
                next = deadline(&current);
            }

            _ = tick => {
                let pulse = if acked.swap(false, Ordering::SeqCst) {
                    let sequence = *sequence.borrow();
                    log::trace!("Heartbeat tick, sequence {:?}", sequence);
                    next = deadline(&control.borrow());
                    Pulse::Beat { sequence }
                } else {
                    log::debug!("Heartbeat not acked in time");
                    next = None;
                    Pulse::Timeout
                };

                if pulses.send(pulse).await.is_err() {
                    log::debug!("Heartbeat pulse receiver dropped, stop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn monitor() -> (
        HeartbeatMonitor,
        watch::Sender<Option<u64>>,
        mpsc::Receiver<Pulse>,
    ) {
        let (sn_tx, sn_rx) = watch::channel(None);
        let (pulse_tx, pulse_rx) = mpsc::channel(8);
        (HeartbeatMonitor::new(sn_rx, pulse_tx), sn_tx, pulse_rx)
    }

    async fn advance(ms: u64) {
        tokio::time::advance(Duration::from_millis(ms)).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_beat_carries_latest_sequence() {
        let (mut monitor, sn_tx, mut pulses) = monitor();

        monitor.start(Duration::from_millis(1000));
        sn_tx.send(Some(7)).unwrap();

        advance(1000).await;
        assert_eq!(pulses.recv().await, Some(Pulse::Beat { sequence: Some(7) }));

        monitor.heartbeat_ack();
        sn_tx.send(Some(9)).unwrap();

        advance(1000).await;
        assert_eq!(pulses.recv().await, Some(Pulse::Beat { sequence: Some(9) }));

        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_ack_signals_one_timeout() {
        let (mut monitor, _sn_tx, mut pulses) = monitor();

        monitor.start(Duration::from_millis(1000));

        advance(1000).await;
        assert_eq!(pulses.recv().await, Some(Pulse::Beat { sequence: None }));

        advance(1000).await;
        assert_eq!(pulses.recv().await, Some(Pulse::Timeout));

        advance(5000).await;
        assert!(pulses.try_recv().is_err());

        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume() {
        let (mut monitor, _sn_tx, mut pulses) = monitor();

        monitor.start(Duration::from_millis(1000));
        monitor.pause();
        tokio::task::yield_now().await;
        assert!(!monitor.is_running());

        advance(3000).await;
        assert!(pulses.try_recv().is_err());

        monitor.resume(true);
        tokio::task::yield_now().await;
        advance(1000).await;
        assert_eq!(pulses.recv().await, Some(Pulse::Beat { sequence: None }));

        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_pause_resumes_with_fresh_ack() {
        let (mut monitor, _sn_tx, mut pulses) = monitor();

        monitor.start(Duration::from_millis(1000));
        advance(1000).await;
        assert_eq!(pulses.recv().await, Some(Pulse::Beat { sequence: None }));

        // connection dropped before the ack arrived
        monitor.pause();
        tokio::task::yield_now().await;

        monitor.start(Duration::from_millis(500));
        tokio::task::yield_now().await;
        advance(500).await;
        assert_eq!(pulses.recv().await, Some(Pulse::Beat { sequence: None }));

        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let (mut monitor, _sn_tx, mut pulses) = monitor();

        monitor.start(Duration::from_millis(1000));
        monitor.stop().await;
        monitor.stop().await;

        advance(2000).await;
        assert!(pulses.try_recv().is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_stop_before_task_polled_returns() {
        let (mut monitor, _sn_tx, _pulses) = monitor();

        // the spawned task has not run yet on a current thread runtime
        monitor.start(Duration::from_millis(1000));
        tokio::time::timeout(Duration::from_secs(5), monitor.stop())
            .await
            .unwrap();
    }
}
