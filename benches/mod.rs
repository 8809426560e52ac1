use criterion::{criterion_group, criterion_main};

mod network {
    pub mod application {
        pub mod mqtt {
            pub mod client;
            pub mod packet;
        }
    }
}

criterion_group!(
    benches,
    network::application::mqtt::packet::bench_encode,
    network::application::mqtt::packet::bench_decode,
    network::application::mqtt::client::bench_publish_qos0,
    network::application::mqtt::client::bench_publish_qos1_acked,
    network::application::mqtt::client::bench_receive_qos1
);
criterion_main!(benches);
