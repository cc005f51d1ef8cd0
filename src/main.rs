//! blepass firmware - nRF52840 + S140 SoftDevice, SSD1306 OLED, 5 buttons.
//!
//! One cooperative loop owns the UI, the power policy and the display.
//! The BLE side runs in the SoftDevice callbacks (see `softdevice.rs`);
//! both meet in the `RefCell<Ble>` and the HOGP mailbox.

#![no_std]
#![no_main]

mod softdevice;

use core::cell::RefCell;

use defmt::{error, info, unwrap, warn};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_nrf::gpio::{AnyPin, Level, Output, OutputDrive, Pin};
use embassy_nrf::{bind_interrupts, interrupt, peripherals, saadc, twim};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Ticker, Timer};
use nrf_softdevice::ble::gatt_server;
use nrf_softdevice::ble::peripheral::{self, ConnectableAdvertisement};
use nrf_softdevice::{raw, Softdevice};
use panic_probe as _;
use static_cell::StaticCell;

use blepass::ble::hogp::{DriverConfig, Hogp};
use blepass::config::{
    BLE_TASK_PERIOD_MS, DISPLAY_REFRESH_MS, LED_TASK_PERIOD_MS, MAX_SCHEDULED_TASKS, PIN_LENGTH, TICK_PERIOD_MS,
    TYPING_RETRIES, TYPING_RETRY_MS,
};
use blepass::hid::TypingSequence;
use blepass::power::{PowerManager, PowerState};
use blepass::power_logic::battery_percent;
use blepass::sched::{MailboxMessage, Scheduler};
use blepass::tick::{Countdown, Countdowns};
use blepass::ui::buttons::{button_task, BUTTON_QUEUE_DEPTH};
use blepass::ui::credentials::{Credential, CredentialStore, SliceStore};
use blepass::ui::{display, ButtonEvent, Screen, Ui, UiAction};
use blepass::StackError;

use softdevice::{Ble, Bridge, SoftdeviceStack, ADVERTISING_CHANGED};

bind_interrupts!(struct Irqs {
    TWISPI0 => twim::InterruptHandler<peripherals::TWISPI0>;
    SAADC => saadc::InterruptHandler;
});

type I2c = twim::Twim<'static, peripherals::TWISPI0>;

/// Compiled-in credentials.
static CREDENTIALS: [Credential<'static>; 2] = [
    Credential {
        name: "example.org",
        login: b"user@example.org",
        password: b"change me",
    },
    Credential {
        name: "forge",
        login: b"user",
        password: b"change me too",
    },
];
const UNLOCK_PIN: [u8; PIN_LENGTH] = [1, 2, 3, 4];

/// POWER.USBREGSTATUS.VBUSDETECT
const USBREGSTATUS_VBUSDETECT: u32 = 0x1;

static COUNTDOWNS: Countdowns = Countdowns::new();
static BUTTONS: Channel<CriticalSectionRawMutex, ButtonEvent, BUTTON_QUEUE_DEPTH> = Channel::new();
static BLE: StaticCell<RefCell<Ble>> = StaticCell::new();
static BRIDGE: StaticCell<Bridge> = StaticCell::new();

/// Everything the scheduler tasks operate on.
struct App {
    ble: &'static RefCell<Ble>,
    ui: Ui,
    power: PowerManager,
    store: SliceStore<'static>,
    display: display::Display<I2c>,
    led: Output<'static>,
    battery: u8,
    dirty: bool,
    usb_mode: bool,
}

impl App {
    async fn on_button(&mut self, button: ButtonEvent) {
        let was_dark = !self.power.display_on();
        self.power.activity(&COUNTDOWNS);
        self.dirty = true;
        if was_dark {
            // the first press only wakes the screen
            return;
        }
        if let Some(action) = self.ui.on_button(button, &self.store) {
            self.perform(action).await;
        }
    }

    async fn perform(&mut self, action: UiAction) {
        let texts = match action {
            UiAction::SendLogin(i) => [self.store.login(i), None],
            UiAction::SendPassword(i) => [self.store.password(i), None],
            UiAction::SendCredential(i) => [self.store.login(i), self.store.password(i)],
            UiAction::PasskeyDigit(digit) => {
                self.ble.borrow_mut().hogp.enter_passkey_digit(digit);
                return;
            }
            UiAction::PowerOff => power_off(&mut self.display),
        };
        for text in texts.into_iter().flatten() {
            if let Err(e) = type_text(self.ble, text).await {
                warn!("main: typing failed: {}", e);
                return;
            }
        }
    }

    fn set_usb_mode(&mut self, usb_mode: bool) {
        if self.usb_mode == usb_mode {
            return;
        }
        self.usb_mode = usb_mode;
        {
            let mut guard = self.ble.borrow_mut();
            let Ble { stack, hogp } = &mut *guard;
            if usb_mode {
                if let Err(e) = hogp.enter_usb_mode(stack) {
                    warn!("main: entering USB mode: {}", e);
                }
            } else {
                hogp.leave_usb_mode(stack);
            }
        }
        self.ui.set_usb_mode(usb_mode);
        self.power.set_usb_mode(usb_mode, &COUNTDOWNS);
        self.dirty = true;
    }
}

// Scheduler tasks

fn ble_service(app: &mut App) {
    let message = {
        let mut guard = app.ble.borrow_mut();
        guard.poll_timers();
        let Ble { stack, hogp } = &mut *guard;
        match hogp.task_handler(stack) {
            Ok(message) => message,
            Err(e) => {
                warn!("main: BLE task handler: {}", e);
                None
            }
        }
    };
    if let Some(message) = message {
        info!("main: mailbox {}", message);
        app.ui.on_ble(message);
        if message == MailboxMessage::PasskeyRequested {
            app.power.activity(&COUNTDOWNS);
        }
        app.dirty = true;
    }
}

fn status_led(app: &mut App) {
    let (valid, encrypted) = {
        let ble = app.ble.borrow();
        (ble.hogp.connection().is_valid(), ble.hogp.connection_status())
    };
    match (valid, encrypted) {
        // active-low
        (_, true) => app.led.set_low(),
        (true, false) => app.led.set_high(),
        (false, false) => app.led.toggle(),
    }
}

fn refresh_display(app: &mut App) {
    if !app.dirty || !COUNTDOWNS.expired(Countdown::DisplayRefresh) {
        return;
    }
    COUNTDOWNS.reload(Countdown::DisplayRefresh, DISPLAY_REFRESH_MS);
    app.dirty = false;
    if app.power.display_on() {
        display::render(&mut app.display, &app.ui, &app.store, app.battery);
    }
}

/// Type `text` and Tab one frame at a time.
///
/// A full SoftDevice notification queue is waited out for up to
/// `TYPING_RETRIES` attempts; any other failure releases the keys and
/// gives up.
async fn type_text(ble: &RefCell<Ble>, text: &[u8]) -> Result<(), StackError> {
    if !ble.borrow().hogp.typing_allowed() {
        return Ok(());
    }
    for frame in TypingSequence::new(text) {
        let mut retries = 0;
        loop {
            let sent = {
                let mut guard = ble.borrow_mut();
                let Ble { stack, hogp } = &mut *guard;
                hogp.send_key_frame(stack, frame)
            };
            match sent {
                Ok(()) => break,
                Err(StackError::NoResources) if retries < TYPING_RETRIES => {
                    retries += 1;
                    Timer::after(Duration::from_millis(TYPING_RETRY_MS.into())).await;
                }
                Err(e) => {
                    let mut guard = ble.borrow_mut();
                    let Ble { stack, hogp } = &mut *guard;
                    hogp.release_keys(stack);
                    return Err(e);
                }
            }
        }
    }
    Ok(())
}

fn now_ms() -> u32 {
    Instant::now().as_millis() as u32
}

fn vbus_present() -> bool {
    let mut status = 0u32;
    let ret = unsafe { raw::sd_power_usbregstatus_get(&mut status) };
    ret == raw::NRF_SUCCESS && status & USBREGSTATUS_VBUSDETECT != 0
}

fn power_off(display: &mut display::Display<I2c>) -> ! {
    info!("main: powering off");
    display::set_power(display, false);
    // TODO: arm GPIO SENSE on the SELECT pin so a press wakes the board from System OFF
    unsafe {
        raw::sd_power_system_off();
    }
    loop {
        cortex_m::asm::wfe();
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("blepass starting");

    let mut nrf_config = embassy_nrf::config::Config::default();
    // SoftDevice reserves priorities 0, 1 and 4
    nrf_config.gpiote_interrupt_priority = interrupt::Priority::P2;
    nrf_config.time_interrupt_priority = interrupt::Priority::P2;
    let p = embassy_nrf::init(nrf_config);

    let mut twim_config = twim::Config::default();
    twim_config.frequency = twim::Frequency::K400;
    let i2c = twim::Twim::new(p.TWISPI0, Irqs, p.P0_26, p.P0_27, twim_config);
    let mut oled = display::init(i2c);

    let mut saadc_config = saadc::Config::default();
    saadc_config.resolution = saadc::Resolution::_12BIT;
    let channel = saadc::ChannelConfig::single_ended(saadc::VddhDiv5Input);
    let mut adc = saadc::Saadc::new(p.SAADC, Irqs, saadc_config, [channel]);

    let sd_config = nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatts: Some(raw::ble_gatts_conn_cfg_t { hvn_tx_queue_size: 128 }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
            central_role_count: 0,
            central_sec_count: 0,
            _bitfield_1: Default::default(),
        }),
        ..Default::default()
    };
    let sd = Softdevice::enable(&sd_config);

    let mut stack = SoftdeviceStack::new(sd);
    let hogp = match Hogp::init(&mut stack, &DriverConfig::default()) {
        Ok(hogp) => hogp,
        Err(e) => {
            error!("main: BLE init failed: {}", e);
            display::draw_error(&mut oled, "BLE init failed");
            Timer::after(Duration::from_secs(3)).await;
            power_off(&mut oled);
        }
    };
    let Some(sd) = stack.start() else {
        defmt::panic!("SoftDevice handed out twice");
    };
    unwrap!(spawner.spawn(softdevice_task(sd)));

    let ble = BLE.init(RefCell::new(Ble { stack, hogp }));
    let bridge = BRIDGE.init(Bridge::new(ble));
    unwrap!(spawner.spawn(advertising_task(sd, ble, bridge)));
    unwrap!(spawner.spawn(tick_task()));

    unwrap!(spawner.spawn(button(p.P0_11.degrade(), ButtonEvent::Up)));
    unwrap!(spawner.spawn(button(p.P0_12.degrade(), ButtonEvent::Down)));
    unwrap!(spawner.spawn(button(p.P0_24.degrade(), ButtonEvent::Left)));
    unwrap!(spawner.spawn(button(p.P0_25.degrade(), ButtonEvent::Right)));
    unwrap!(spawner.spawn(button(p.P1_08.degrade(), ButtonEvent::Select)));

    let mut app = App {
        ble,
        ui: Ui::new(),
        power: PowerManager::new(&COUNTDOWNS),
        store: SliceStore::new(&CREDENTIALS, UNLOCK_PIN),
        display: oled,
        led: Output::new(p.P0_13, Level::High, OutputDrive::Standard),
        battery: 100,
        dirty: true,
        usb_mode: false,
    };

    let mut scheduler: Scheduler<App, MAX_SCHEDULED_TASKS> = Scheduler::new();
    let now = now_ms();
    unwrap!(scheduler.add(ble_service, BLE_TASK_PERIOD_MS, now));
    unwrap!(scheduler.add(status_led, LED_TASK_PERIOD_MS, now));
    unwrap!(scheduler.add(refresh_display, DISPLAY_REFRESH_MS, now));
    info!("main: entering main loop");

    loop {
        let tick = Timer::after(Duration::from_millis(BLE_TASK_PERIOD_MS.into()));
        if let Either::First(button) = select(BUTTONS.receive(), tick).await {
            app.on_button(button).await;
        }

        if app.power.battery_poll_due(&COUNTDOWNS) {
            let mut sample = [0i16; 1];
            adc.sample(&mut sample).await;
            // 12 bit over 3.6 V full scale, VDDH / 5
            let millivolts = (i32::from(sample[0]).max(0) * 3600 * 5 / 4096) as u16;
            app.battery = battery_percent(millivolts);
            let mut guard = app.ble.borrow_mut();
            let Ble { stack, hogp } = &mut *guard;
            if let Err(e) = hogp.update_battery_level(stack, app.battery) {
                warn!("main: battery notify: {}", e);
            }
            drop(guard);
            app.dirty = true;
        }

        app.set_usb_mode(vbus_present());
        scheduler.process(now_ms(), &mut app);

        let was_on = app.power.display_on();
        match app.power.update(&COUNTDOWNS) {
            PowerState::Off => power_off(&mut app.display),
            state => {
                let on = state == PowerState::Active;
                if on != was_on {
                    display::set_power(&mut app.display, on);
                    if !on && app.ui.screen() == Screen::Home {
                        app.ui.lock();
                    }
                    app.dirty = true;
                }
            }
        }
    }
}

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

/// Advertise whenever the state machine asks for it, then serve the link.
#[embassy_executor::task]
async fn advertising_task(sd: &'static Softdevice, ble: &'static RefCell<Ble>, bridge: &'static Bridge) -> ! {
    loop {
        let requested = ble.borrow().stack.advertisement();
        let Some((adv_data, interval)) = requested else {
            ADVERTISING_CHANGED.wait().await;
            continue;
        };
        ADVERTISING_CHANGED.reset();

        let adv = ConnectableAdvertisement::ScannableUndirected {
            adv_data: &adv_data,
            scan_data: &[],
        };
        let config = peripheral::Config {
            interval,
            ..Default::default()
        };
        match select(peripheral::advertise_pairable(sd, adv, &config, bridge), ADVERTISING_CHANGED.wait()).await {
            Either::First(Ok(conn)) => {
                ble.borrow_mut().connected(&conn);
                let e = gatt_server::run(&conn, bridge, |_| {}).await;
                info!("main: link closed: {:?}", e);
                ble.borrow_mut().disconnected(&conn);
            }
            Either::First(Err(e)) => {
                warn!("main: advertising failed: {:?}", e);
                ble.borrow_mut().advertising_failed();
                Timer::after(Duration::from_secs(1)).await;
            }
            // stopped, or a new payload
            Either::Second(()) => {}
        }
    }
}

#[embassy_executor::task]
async fn tick_task() -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(TICK_PERIOD_MS.into()));
    loop {
        ticker.next().await;
        COUNTDOWNS.tick(TICK_PERIOD_MS);
    }
}

#[embassy_executor::task(pool_size = 5)]
async fn button(pin: AnyPin, event: ButtonEvent) -> ! {
    button_task(pin, event, &BUTTONS.sender()).await
}
