// Tests for the relay link forwarding real controller and schedule updates

mod common;

#[cfg(test)]
mod tests {
    use super::common::kiln;
    use futures_util::FutureExt;
    use kiln_rs::communication::{KilnSources, RelayError, RelayLink, Worker, WorkerLauncher};
    use kiln_rs::scheduler::StepRequest;
    use std::io;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex};
    use tokio::sync::{mpsc, oneshot};

    struct Peer {
        stdin: tokio::io::Lines<BufReader<tokio::io::DuplexStream>>,
        stdout: tokio::io::DuplexStream,
        _stderr: tokio::io::DuplexStream,
        _exit: oneshot::Sender<()>,
    }

    struct PipeLauncher(mpsc::UnboundedSender<Peer>);

    impl WorkerLauncher for PipeLauncher {
        fn launch(&self) -> Result<Worker, RelayError> {
            let (stdin, stdin_peer) = duplex(8192);
            let (stdout, stdout_peer) = duplex(8192);
            let (stderr, stderr_peer) = duplex(8192);
            let (exit_tx, exit_rx) = oneshot::channel::<()>();
            self.0
                .send(Peer {
                    stdin: BufReader::new(stdin_peer).lines(),
                    stdout: stdout_peer,
                    _stderr: stderr_peer,
                    _exit: exit_tx,
                })
                .map_err(|_| io::Error::other("test gone"))?;
            Ok(Worker {
                stdin: Box::new(stdin),
                stdout: Box::new(stdout),
                stderr: Box::new(stderr),
                exited: async move {
                    let _ = exit_rx.await;
                }
                .boxed(),
            })
        }
    }

    #[tokio::test]
    async fn test_controller_updates_carry_schedule_snapshot() {
        let k = kiln();
        k.scheduler
            .set_schedule(&[StepRequest {
                temperature: Some(100.0),
                ramp_minutes: Some(10.0),
                soak_minutes: Some(20.0),
                ramp_start_temperature: Some(20.0),
            }])
            .await
            .unwrap();

        let (peers_tx, mut peers) = mpsc::unbounded_channel();
        let sources = KilnSources {
            controller: k.controller.clone(),
            scheduler: k.scheduler.clone(),
        };
        let link = RelayLink::spawn(Arc::new(PipeLauncher(peers_tx)), Arc::new(sources), Duration::ZERO);

        let mut peer = peers.recv().await.unwrap();
        peer.stdout.write_all(b"ready\n").await.unwrap();
        // Let the link subscribe and pick up the snapshot
        tokio::time::sleep(Duration::from_millis(50)).await;

        k.controller.ingest_line("fragment").await;
        k.controller.ingest_line("T1=2500 (25.00)").await;
        k.controller.publish_update().await;

        let line = tokio::time::timeout(Duration::from_secs(5), peer.stdin.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(json["setpoint"], 20.0);
        assert_eq!(json["computed"]["T1"], 25.0);
        assert_eq!(json["computed"]["temperature"], 25.0);
        assert_eq!(json["schedule"]["currentStep"]["rampMinutes"], 10);
        assert!(json["schedule"]["now"].is_i64());

        link.close();
        link.join().await;
        k.scheduler.clear_schedule().await;
    }
}
