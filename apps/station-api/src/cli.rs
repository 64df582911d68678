use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "station-api",
    version,
    about = "Sensor node telemetry ingestion and dashboard API"
)]
pub struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
}
