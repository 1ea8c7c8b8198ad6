//! Sensor node firmware.
//!
//! Boots, joins the ZigBee network (or resumes the stored schedule after a
//! hibernation wake) and then runs the duty cycle forever.
//!
//! - **ESP32**: `cargo espflash flash --bin node --features esp32 --release`
//! - **Host**: use `host-node`, which runs the same cycle on simulated hardware
//!
//! ## Wiring
//!
//! | Signal            | GPIO |
//! |-------------------|------|
//! | XBee DIN (UART TX)| 17   |
//! | XBee DOUT (UART RX)| 16  |
//! | Radio supply      | 4    |
//! | XBee SLEEP_RQ     | 5    |
//! | Rain gauge        | 25   |

#[cfg(feature = "esp32")]
fn main() {
    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    if let Err(e) = firmware::run() {
        log::error!("Node stopped: {}", e);
    }
    log::error!("Restarting in 10 s");
    std::thread::sleep(std::time::Duration::from_secs(10));
    unsafe { esp_idf_sys::esp_restart() }
}

#[cfg(feature = "esp32")]
mod firmware {
    use esp_idf_hal::peripherals::Peripherals;
    use log::{info, warn};
    use xbee_sensor_node::hal::SystemTimer;
    use xbee_sensor_node::persistence::NvsStore;
    use xbee_sensor_node::platform::{
        boot_reason, sleep_request_line, EspClock, EspPower, UartLink, XBeePins,
    };
    use xbee_sensor_node::transport::packet_ids;
    use xbee_sensor_node::{Devices, DispatchTable, NodeConfig, Packet, SensorNode, XBeeRadio};

    #[cfg(feature = "board-weather-station")]
    const RAIN_GAUGE_GPIO: i32 = 25;

    pub fn run() -> Result<(), Box<dyn std::error::Error>> {
        let boot = boot_reason();
        info!("=== XBee sensor node starting ({:?}) ===", boot);

        let peripherals = Peripherals::take()?;
        let pins = peripherals.pins;

        let serial = UartLink::new(peripherals.uart1, pins.gpio17, pins.gpio16)?;
        let sleep_line = sleep_request_line(pins.gpio5)?;
        let module_pins = XBeePins::new(pins.gpio4, sleep_line.clone())?;
        let power = EspPower::new(sleep_line);
        #[cfg(feature = "board-weather-station")]
        let power = power.with_rain_gauge(RAIN_GAUGE_GPIO);

        let config = NodeConfig::default().validate()?;
        let mut dispatch = DispatchTable::new();
        dispatch.register(packet_ids::SENSOR_READING, |packet: &Packet| {
            info!("Gateway returned {} byte reading", packet.payload.len());
        })?;
        dispatch.register(packet_ids::ERROR_REPORT, |packet: &Packet| {
            warn!("Gateway error report: {:02X?}", packet.payload);
        })?;

        let devices = Devices {
            radio: Box::new(XBeeRadio::new(serial, module_pins)),
            clock: Box::new(EspClock::new()),
            power: Box::new(power),
            store: Box::new(NvsStore::open()?),
            timer: Box::new(SystemTimer::new()),
        };

        let mut node = SensorNode::new(config, devices, dispatch)?;
        let outcome = node.start(boot)?;
        info!("Network: {:?}", outcome);

        let mut cycle: u32 = 0;
        loop {
            let mut reading = cycle.to_be_bytes().to_vec();
            reading.extend_from_slice(&node.now()?.as_secs().to_be_bytes());
            let report = node.run_cycle(&reading)?;
            info!(
                "Cycle {}: {:?}, {} interrupt(s)",
                cycle, report.sleep, report.interrupts
            );
            cycle = cycle.wrapping_add(1);
        }
    }
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Use 'cargo run --bin host-node' to simulate the node on the host.");
}
