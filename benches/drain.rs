use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ezstream::{websocket_data, CloseCode, MemorySocket};
use futures::executor::block_on;
use futures::StreamExt;

fn drain_buffered(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain_buffered");
    for count in [16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let socket = MemorySocket::<()>::open();
                let stream = websocket_data(socket.clone());
                for i in 0..count {
                    socket.emit_message(i.to_string());
                }
                socket.emit_close(CloseCode::Normal, "");
                black_box(block_on(stream.count()))
            })
        });
    }
    group.finish();
}

fn ping_pong(c: &mut Criterion) {
    c.bench_function("deliver_to_waiting_pull", |b| {
        let socket = MemorySocket::<()>::open();
        let stream = websocket_data(socket.clone());
        b.iter(|| {
            block_on(async {
                let (value, ()) = futures::join!(stream.next_value(), async {
                    socket.emit_message("x");
                });
                black_box(value)
            })
        })
    });
}

criterion_group!(benches, drain_buffered, ping_pong);
criterion_main!(benches);
