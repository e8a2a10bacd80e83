use ezstream::{websocket_data, CloseCode, MemorySocket, Message};
use futures::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

type Socket = MemorySocket<String>;

#[tokio::test]
async fn everything_sent_ahead_of_pulling_is_read_back_in_order() {
    let mut rng = StdRng::seed_from_u64(1);
    for _ in 0..20 {
        let count = rng.gen_range(0..64);
        let socket = Socket::open();
        let stream = websocket_data(socket.clone());
        for i in 0..count {
            socket.emit_message(i.to_string());
        }
        socket.emit_close(CloseCode::Normal, "");

        for i in 0..count {
            assert_eq!(stream.next_value().await, Some(Ok(Message::text(i.to_string()))));
        }
        assert_eq!(stream.next_value().await, None);
    }
}

#[tokio::test]
async fn random_interleaving_on_one_task_preserves_order() {
    let mut rng = StdRng::seed_from_u64(2);
    for _ in 0..50 {
        let total = rng.gen_range(1..40);
        let socket = Socket::open();
        let stream = websocket_data(socket.clone());

        let mut sent = 0;
        let mut received = Vec::new();
        while received.len() < total {
            if sent < total && (sent == received.len() || rng.gen_bool(0.5)) {
                socket.emit_message(sent.to_string());
                sent += 1;
            } else {
                let value = stream.next_value().await.unwrap().unwrap();
                received.push(value.as_text().unwrap().parse::<usize>().unwrap());
            }
        }
        assert_eq!(received, (0..total).collect::<Vec<_>>());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn producer_and_consumer_on_different_tasks_preserve_order() {
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..10 {
        let total: usize = rng.gen_range(1..200);
        let pauses: Vec<bool> = (0..total).map(|_| rng.gen_bool(0.3)).collect();
        let socket = Socket::open();
        let stream = websocket_data(socket.clone());

        let consumer = tokio::spawn(async move {
            stream
                .map(|value| value.unwrap().as_text().unwrap().parse::<usize>().unwrap())
                .collect::<Vec<_>>()
                .await
        });
        for (i, pause) in pauses.into_iter().enumerate() {
            socket.emit_message(i.to_string());
            if pause {
                tokio::task::yield_now().await;
            }
        }
        socket.emit_close(CloseCode::Normal, "");

        assert_eq!(consumer.await.unwrap(), (0..total).collect::<Vec<_>>());
    }
}
