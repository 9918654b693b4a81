//! Host-side runtime binary.
//!
//! Boots the runtime core against `std::fs` storage and null peripherals so
//! the shared services can be exercised on a development machine. The data
//! root doubles as the "storage medium"; ROMs go under `roms/`, saves land
//! under `saves/`.

use std::sync::Arc;

use color_eyre::eyre::eyre;
use color_eyre::Result;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use pocketcore::battery::AdcReader;
use pocketcore::input::{ControlLines, RawLines};
use pocketcore::paths::SavePaths;
use pocketcore::platform::{HostControl, HostMemory, NullAudio, NullDisplay, NullLed};
use pocketcore::{HostStorage, Peripherals, Runtime, TomlSettings};

/// Control lines with nothing attached; every sample reads idle.
struct IdleLines;

impl ControlLines for IdleLines {
    fn read_raw(&mut self) -> RawLines {
        RawLines::default()
    }
}

/// ADC stand-in reporting a healthy cell through the 10k/10k divider.
struct FixedAdc;

impl AdcReader for FixedAdc {
    fn calibrate(&mut self) {}

    fn read_millivolts(&mut self) -> f32 {
        1950.0
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let data_root = dirs::data_dir()
        .ok_or_else(|| eyre!("no data directory on this platform"))?
        .join("pocketcore");
    std::fs::create_dir_all(&data_root)?;
    info!("data root: {}", data_root.display());

    let settings = Arc::new(TomlSettings::load(data_root.join("settings.toml")));
    let peripherals = Peripherals {
        lines: Box::new(IdleLines),
        adc: Box::new(FixedAdc),
        display: Arc::new(NullDisplay),
        audio: Arc::new(NullAudio),
        led: Arc::new(NullLed),
        control: Arc::new(HostControl::default()),
        memory: Arc::new(HostMemory),
        storage: Arc::new(HostStorage::new(data_root.clone())),
        settings,
        paths: SavePaths::new(&data_root),
    };

    let runtime = match Runtime::init(0, peripherals) {
        Ok(runtime) => runtime,
        Err(termination) => {
            info!("runtime terminated during boot: {termination:?}");
            return Ok(());
        }
    };

    info!("runtime core up, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    runtime.terminate();
    info!("shut down");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
