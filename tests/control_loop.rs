// Tests for the controller's run loop against a scripted line stream

mod common;

#[cfg(test)]
mod tests {
    use super::common::{kiln, receiver_stream};
    use kiln_rs::Tunings;
    use futures_util::StreamExt;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_loop_controls_relays_and_debounces_updates() {
        let k = kiln();
        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        let mut updates = k.controller.subscribe();

        let controller = k.controller.clone();
        let task = tokio::spawn(async move { controller.run(receiver_stream(lines_rx).boxed()).await });

        lines_tx.send("=2000 (trunc".to_string()).unwrap();
        for code in [2000, 2100, 2200] {
            lines_tx.send(format!("T1={} ({})", code, code as f64 / 100.0)).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        lines_tx.send("R=0 relays".to_string()).unwrap();

        // One notification for the whole burst
        tokio::time::sleep(Duration::from_millis(300)).await;
        let status = updates.try_recv().unwrap();
        assert!(updates.try_recv().is_err());
        assert_eq!(status.raw["R"], 0);
        assert!(status.computed.temperature.is_some());

        k.controller.set_tunings(Tunings { kp: 10.0, ki: 0.0, kd: 0.0 }).await;
        k.controller.set_target_temperature(1000.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(k.transport.commands(), vec!["ON"]);
        assert_eq!(k.controller.history().await.len(), 1);

        k.controller.close();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_process_turns_reported_relays_off() {
        let k = kiln();
        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        let controller = k.controller.clone();
        let task = tokio::spawn(async move { controller.run(receiver_stream(lines_rx).boxed()).await });

        lines_tx.send("partial".to_string()).unwrap();
        lines_tx.send("R=1 relays on".to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(k.transport.commands(), vec!["OFF"]);
        assert!(k.controller.history().await.is_empty());

        lines_tx.send("R=0 relays off".to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(k.transport.commands(), vec!["OFF"]);

        k.controller.close();
        task.await.unwrap();
    }
}
