//! TAP test runner binary.
//!
//! Runs the tests registered with `#[tap_test]` and prints TAP on the
//! console. An optional argument selects tests whose name contains it.
//!
//! # Usage
//!
//! ```bash
//! # Run on host
//! cargo run --bin device-tests --features tap-tests -- schedule
//!
//! # Flash to hardware
//! cargo espflash flash --bin device-tests --features esp32,tap-tests --release --monitor
//! ```

#[cfg(feature = "esp32")]
use esp_idf_svc::sys as _;

fn main() {
    #[cfg(feature = "esp32")]
    {
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();
    }
    #[cfg(not(feature = "esp32"))]
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let filter = std::env::args().nth(1).unwrap_or_default();
    let success = xbee_sensor_node::testing::run_tests(&filter);

    #[cfg(feature = "esp32")]
    {
        log::info!(
            "Tests complete ({}). Halting.",
            if success { "all passed" } else { "failures" }
        );
        loop {
            std::thread::sleep(std::time::Duration::from_secs(1));
        }
    }

    #[cfg(not(feature = "esp32"))]
    std::process::exit(if success { 0 } else { 1 });
}
