#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_net::{Config as NetConfig, StackResources};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Delay, Instant, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::rng::Rng;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::usb_serial_jtag::UsbSerialJtag;
use log::{LevelFilter, info, warn};
use static_cell::StaticCell;

use sck_core::afe::{AnalogFrontEnd, FrontEndProfile, Mcp46x1Pair};
use sck_core::bus::{SharedAnalog, SharedI2c};
use sck_core::config::{BoardRevision, NodeConfig};
use sck_core::gas::GasSampler;
use sck_core::node::Node;
use sck_core::sensors::{Bh1730, BoardSuite, Rev10Suite, Rev11Suite, Sht21};
use sck_core::storage::eeprom::DEFAULT_ADDRESS;
use sck_core::storage::{Eeprom24x, EepromStore, MeasurementQueue};
use sck_core::uplink::{NoRtc, UplinkController};
use sck_firmware::board::{
    AnalogPins, BoardAdc, BoardPower, BoardSupply, HeaterPins, SharedBoardAdc,
    rev10_heater_lines, rev11_heater_lines,
};
use sck_firmware::console::{COMMANDS, GATE, REPLIES, console_task};
use sck_firmware::net::{WifiModem, net_task};
use sck_firmware::wifi_secrets;

/// 24LC256 on the sensor board.
const EEPROM_SIZE: u32 = 32 * 1024;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

type I2cDriver = I2c<'static, esp_hal::Async>;

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!(LevelFilter::Info);

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("sck-rs {} starting", sck_core::config::FIRMWARE_VERSION);

    // Shared I2C bus: EEPROM, both potentiometers, SHT21, BH1730
    let i2c = I2c::new(
        peripherals.I2C0,
        I2cConfig::default().with_frequency(Rate::from_khz(100)),
    )
    .expect("I2C0 configuration rejected")
    .with_sda(peripherals.GPIO13)
    .with_scl(peripherals.GPIO14)
    .into_async();
    static I2C_BUS: StaticCell<Mutex<CriticalSectionRawMutex, I2cDriver>> = StaticCell::new();
    let i2c_bus = I2C_BUS.init(Mutex::new(i2c));

    static ADC: StaticCell<SharedBoardAdc> = StaticCell::new();
    let adc = ADC.init(Mutex::new(BoardAdc::new(
        peripherals.ADC1,
        AnalogPins {
            s0: peripherals.GPIO1,
            s1: peripherals.GPIO2,
            s2: peripherals.GPIO3,
            s3: peripherals.GPIO4,
            s4: peripherals.GPIO5,
            s5: peripherals.GPIO6,
            battery: peripherals.GPIO7,
            panel: peripherals.GPIO8,
            supply: peripherals.GPIO9,
        },
    )));

    // Persistent state
    let eeprom = Eeprom24x::new(SharedI2c::new(i2c_bus), Delay, DEFAULT_ADDRESS, EEPROM_SIZE);
    let mut store = EepromStore::new(eeprom);

    // WiFi
    let radio = esp_radio::init().expect("Failed to initialize Wi-Fi/BLE controller");
    static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
    let radio = &*RADIO.init(radio);
    let (controller, interfaces) = esp_radio::wifi::new(radio, peripherals.WIFI, Default::default())
        .expect("Failed to initialize Wi-Fi controller");
    let device = interfaces.sta;
    let mac = device.mac_address();

    let rng = Rng::new();
    let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());
    static NET_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
    let (stack, runner) = embassy_net::new(
        device,
        NetConfig::dhcpv4(Default::default()),
        NET_RESOURCES.init(StackResources::new()),
        seed,
    );
    spawner.spawn(net_task(runner)).expect("net_task spawn");

    static RX_BUFFER: StaticCell<[u8; 1536]> = StaticCell::new();
    static TX_BUFFER: StaticCell<[u8; 1536]> = StaticCell::new();
    let mut modem = WifiModem::new(
        controller,
        stack,
        RX_BUFFER.init([0; 1536]),
        TX_BUFFER.init([0; 1536]),
    );

    let mut node_config = NodeConfig::load(&mut store).await;
    if wifi_secrets::seed(&mut node_config, mac) {
        if let Err(e) = node_config.save(&mut store).await {
            warn!("Could not save seeded config: {}", e);
        }
    }
    let queue = MeasurementQueue::load_or_empty(&mut store).await;
    modem.set_networks(&node_config.networks);
    let uplink = UplinkController::new(modem, NoRtc, &GATE);

    // Gas front end and sensors, wired per board revision
    let board = node_config.board;
    info!("Board revision {:?}", board);
    let afe = AnalogFrontEnd::new(
        Mcp46x1Pair::new(SharedI2c::new(i2c_bus)),
        SharedAnalog::new(adc),
        FrontEndProfile::for_board(board),
    );
    let heater_pins = HeaterPins {
        io0: peripherals.GPIO15,
        io1: peripherals.GPIO16,
        io2: peripherals.GPIO17,
    };
    let (heaters, suite) = match board {
        BoardRevision::Rev10 => {
            let (heaters, dht) = rev10_heater_lines(heater_pins, peripherals.GPIO18);
            let suite = Rev10Suite::new(dht, SharedAnalog::new(adc), BoardPower::new(adc), Delay);
            (heaters, BoardSuite::Rev10(suite))
        }
        BoardRevision::Rev11 => {
            let heaters = rev11_heater_lines(heater_pins, peripherals.GPIO18);
            let suite = Rev11Suite::new(
                Sht21::new(SharedI2c::new(i2c_bus)),
                Bh1730::new(SharedI2c::new(i2c_bus)),
                Mcp46x1Pair::new(SharedI2c::new(i2c_bus)),
                SharedAnalog::new(adc),
                BoardPower::new(adc),
                BoardSupply::new(adc),
                Delay,
            );
            (heaters, BoardSuite::Rev11(suite))
        }
    };
    let mut gas = GasSampler::new(afe, Delay, heaters);
    gas.begin().await;

    info!("{} readings waiting from before reset", queue.pending_count());
    let mut node = Node::new(node_config, store, queue, gas, suite, uplink, Instant::now());

    let usb = UsbSerialJtag::new(peripherals.USB_DEVICE).into_async();
    spawner.spawn(console_task(usb)).expect("console_task spawn");

    loop {
        node.run_cycle(Instant::now()).await;

        let due = node.next_cycle_at(Instant::now());
        if let Either::Second(command) = select(Timer::at(due), COMMANDS.receive()).await {
            let result = node.handle_command(command).await;
            let networks = node.config().networks.clone();
            node.uplink_mut().modem_mut().set_networks(&networks);
            REPLIES.send(result).await;
        }
    }
}
