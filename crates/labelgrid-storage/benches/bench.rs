use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use labelgrid_core::types::OpenParams;
use labelgrid_storage::{
    client::RemoteLabelsWriter,
    server::{config::ServerConfig, serve_with_incoming, service::handler::LabelStoreService},
};
use std::time::Instant;
use tokio::{net::TcpListener, runtime::Builder};
use tokio_stream::wrappers::TcpListenerStream;

const WRITES_PER_ITER: usize = 64;

fn remote_write_bench(c: &mut Criterion) {
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();
    let dir = tempfile::tempdir().unwrap();

    let endpoint = rt.block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(serve_with_incoming(
            LabelStoreService::new(ServerConfig::default()),
            TcpListenerStream::new(listener),
            std::future::pending::<()>(),
        ));
        endpoint
    });

    let buffer_sizes = [4 << 10, 64 << 10, 1 << 20];

    for &buffer_size in &buffer_sizes {
        let mut group = c.benchmark_group("storage/remote_write");
        group.throughput(Throughput::Bytes((buffer_size * WRITES_PER_ITER) as u64));

        group.bench_function(format!("bytes/{buffer_size}"), |b| {
            b.to_async(&rt).iter_custom(|iters| {
                let endpoint = endpoint.clone();
                let data_dir = dir.path().to_path_buf();
                async move {
                    let params = OpenParams::new(data_dir, 0, 128);
                    let mut writer = RemoteLabelsWriter::connect(endpoint, params)
                        .await
                        .expect("Failed to open remote label file");
                    writer.truncate(0).await.expect("truncate failed");
                    let payload = bytes::Bytes::from(vec![0x5a_u8; buffer_size]);

                    let start = Instant::now();
                    for _ in 0..iters {
                        for _ in 0..WRITES_PER_ITER {
                            writer.write(payload.clone()).await.expect("write failed");
                        }
                        writer.flush().await.expect("flush failed");
                    }
                    let elapsed = start.elapsed();

                    writer.close().await.expect("close failed");
                    elapsed
                }
            });
        });

        group.finish();
    }
}

criterion_group!(storage_benches, remote_write_bench);
criterion_main!(storage_benches);
