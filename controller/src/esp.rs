use std::{
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use dht_sensor::dht11;
use ds18b20::{Ds18b20, Resolution};
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
    ws::FrameType,
};
use esp_idf_hal::{
    delay::Ets,
    gpio::{AnyIOPin, AnyOutputPin, IOPin, InputOutput, Output, OutputPin, PinDriver, Pull},
    ledc::{config::TimerConfig, LedcDriver, LedcTimerDriver, Resolution as LedcResolution},
    prelude::*,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    http::server::{
        ws::{EspHttpWsConnection, EspHttpWsDetachedSender},
        Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request,
    },
    ipv4::{
        ClientConfiguration as IpClientConfiguration, ClientSettings as IpClientSettings,
        Configuration as IpConfiguration, Mask, Subnet,
    },
    log::EspLogger,
    netif::{EspNetif, NetifConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs},
    sys::EspError,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use one_wire_bus::{Address, OneWire};
use serde::Serialize;

use kalorifer_common::{
    apply_submission, render_index, ActionSink, Clock, ControlAction, ControlCore, ControlUnit,
    CredentialKey, CredentialStore, ModeResolver, NetworkCredentials, NetworkError, NetworkMode,
    ProvisioningSubmission, PushEvent, RelayBusy, Rgb, RuntimeConfig, SensorSample, SensorSource,
    StaticIpConfig, StationLink, StoreError, SubscriberHandle, SubscriberRegistry,
    DEVICE_DISCONNECTED_C,
};

const NVS_NAMESPACE: &str = "kalorifer";
const NVS_VALUE_MAX: usize = 128;
const MAX_HTTP_BODY: usize = 1024;
const DEFAULT_AP_SSID: &str = "Kalorifer-Setup";
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const DS18B20_PIN: u8 = 4;
const DHT11_PIN: u8 = 14;
const DS18B20_RESOLUTION: Resolution = Resolution::Bits10;
const RGB_PWM_HZ: u32 = 5_000;

const INDEX_HTML: &str = include_str!("../web/index.html");
const WIFIMANAGER_HTML: &str = include_str!("../web/wifimanager.html");
const APP_JS: &str = include_str!("../web/app.js");
const STYLE_CSS: &str = include_str!("../web/style.css");

const CAPTIVE_PORTAL_PATHS: [&str; 6] = [
    "/generate_204",
    "/gen_204",
    "/hotspot-detect.html",
    "/connecttest.txt",
    "/ncsi.txt",
    "/fwlink",
];

type HttpRequest<'r, 'c> = Request<&'r mut EspHttpConnection<'c>>;
type SharedUnit = Arc<Mutex<ControlUnit<Actuators>>>;

struct Actuators {
    relay: PinDriver<'static, AnyOutputPin, Output>,
    buzzer: PinDriver<'static, AnyOutputPin, Output>,
    status_led: PinDriver<'static, AnyOutputPin, Output>,
    rgb: RgbLed,
}

struct RgbLed {
    red: LedcDriver<'static>,
    green: LedcDriver<'static>,
    blue: LedcDriver<'static>,
    _timer: LedcTimerDriver<'static, esp_idf_hal::ledc::TIMER0>,
}

struct SensorSuite {
    one_wire: OneWire<PinDriver<'static, AnyIOPin, InputOutput>>,
    ds18_address: Option<Address>,
    dht_pin: PinDriver<'static, AnyIOPin, InputOutput>,
    delay: Ets,
    cached_humidity: f32,
}

#[derive(Clone)]
struct NvsCredentialStore {
    partition: EspDefaultNvsPartition,
    lock: Arc<Mutex<()>>,
}

struct WifiStation<'w> {
    wifi: &'w mut BlockingWifi<EspWifi<'static>>,
}

struct EspClock;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let credential_store = NvsCredentialStore {
        partition: nvs_partition.clone(),
        lock: Arc::new(Mutex::new(())),
    };

    let mut runtime = RuntimeConfig::default();
    if let Some(err) = runtime.sanitize() {
        warn!("built-in config rejected, using control defaults: {err}");
    }

    let credentials = NetworkCredentials::load(&credential_store);
    info!(
        "NVS credentials loaded: ssid=`{}`, ip=`{}`, gateway=`{}`",
        credentials.ssid, credentials.static_ip, credentials.gateway
    );

    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;

    let sensors = SensorSuite::new(pins.gpio4.downgrade(), pins.gpio14.downgrade())
        .context("sensor bus init failed")?;

    let rgb = RgbLed::new(
        peripherals.ledc.timer0,
        peripherals.ledc.channel0,
        peripherals.ledc.channel1,
        peripherals.ledc.channel2,
        pins.gpio25.downgrade_output(),
        pins.gpio33.downgrade_output(),
        pins.gpio32.downgrade_output(),
    )
    .context("RGB status LED init failed")?;

    let actuators = Actuators {
        relay: low_output(pins.gpio26.downgrade_output())?,
        buzzer: low_output(pins.gpio27.downgrade_output())?,
        status_led: low_output(pins.gpio2.downgrade_output())?,
        rgb,
    };

    let unit: SharedUnit = Arc::new(Mutex::new(ControlUnit::new(
        ControlCore::new(runtime.control.clone()),
        actuators,
    )));
    let (subscribers, subscriber_handle) = SubscriberRegistry::new();

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    spawn_control_loop(unit.clone(), sensors, subscribers);

    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sys_loop.clone(), Some(nvs_partition))?,
        sys_loop,
    )?;

    let mode = {
        let mut link = WifiStation { wifi: &mut wifi };
        ModeResolver::new(runtime.network.clone()).resolve(&credentials, &mut link, &mut EspClock)
    };

    let server = match mode {
        NetworkMode::Managed => {
            disable_wifi_power_save();
            create_http_server(unit, subscriber_handle)?
        }
        NetworkMode::Provisioning => {
            let _ = wifi.disconnect();
            let _ = wifi.stop();
            start_provisioning_ap(&mut wifi)?;
            create_provisioning_http_server(credential_store, runtime.network.restart_grace_ms)?
        }
    };
    info!("{} mode, HTTP server up", mode.as_str());

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _server = server;

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn low_output(pin: AnyOutputPin) -> anyhow::Result<PinDriver<'static, AnyOutputPin, Output>> {
    let mut driver = PinDriver::output(pin)?;
    driver.set_low()?;
    Ok(driver)
}

fn create_http_server(
    unit: SharedUnit,
    subscribers: SubscriberHandle<EspHttpWsDetachedSender>,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 10 * 1024,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf)?;

    {
        let unit = unit.clone();
        server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
            let relay_energized = lock(&unit).core().is_relay_energized();
            write_html(req, &render_index(INDEX_HTML, relay_energized))
        })?;
    }

    for (path, energized) in [("/on", true), ("/off", false)] {
        let unit = unit.clone();
        server.fn_handler::<anyhow::Error, _>(path, Method::Get, move |req| {
            let result = lock(&unit).force_relay(energized);
            match result {
                Ok(()) => {
                    info!("manual override: relay {}", if energized { "on" } else { "off" });
                    write_html(req, &render_index(INDEX_HTML, energized))
                }
                Err(RelayBusy) => write_error(
                    req,
                    409,
                    "Relay is being pulsed by the over-temperature alarm",
                ),
            }
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/readings", Method::Get, move |req| {
        let payload = lock(&unit).core().telemetry_payload();
        write_json(req, &payload)
    })?;

    register_static_assets(&mut server)?;

    server.ws_handler("/events", move |ws: &mut EspHttpWsConnection| -> Result<(), EspError> {
        if ws.is_new() {
            subscribers.joined(ws.session(), ws.create_detached_sender()?);
        } else if ws.is_closed() {
            subscribers.left(ws.session());
        } else {
            // Drain and ignore client frames.
            let mut buf = [0_u8; 64];
            let _ = ws.recv(&mut buf)?;
        }
        Ok(())
    })?;

    Ok(server)
}

fn create_provisioning_http_server(
    credential_store: NvsCredentialStore,
    restart_grace_ms: u64,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 10 * 1024,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf)?;

    for path in std::iter::once("/").chain(CAPTIVE_PORTAL_PATHS) {
        server.fn_handler::<anyhow::Error, _>(path, Method::Get, move |req| {
            write_html(req, WIFIMANAGER_HTML)
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/", Method::Post, move |mut req| {
        let body = read_request_body(&mut req)?;
        let body = String::from_utf8_lossy(&body);
        let submission = ProvisioningSubmission::from_form_body(&body);

        let mut store = credential_store.clone();
        let mut credentials = NetworkCredentials::load(&store);
        let ack = apply_submission(&mut store, &submission, &mut credentials);

        thread::Builder::new()
            .name("prov-restart".into())
            .spawn(move || {
                info!("restarting in {restart_grace_ms} ms");
                thread::sleep(Duration::from_millis(restart_grace_ms));
                unsafe { esp_idf_svc::sys::esp_restart() };
            })
            .expect("failed to spawn restart thread");

        req.into_response(200, Some("OK"), &[("Content-Type", "text/plain")])?
            .write_all(ack.as_bytes())?;
        Ok(())
    })?;

    register_static_assets(&mut server)?;
    Ok(server)
}

fn register_static_assets(server: &mut EspHttpServer<'static>) -> anyhow::Result<()> {
    server.fn_handler::<anyhow::Error, _>("/app.js", Method::Get, move |req| {
        req.into_response(200, Some("OK"), &[("Content-Type", "application/javascript")])?
            .write_all(APP_JS.as_bytes())?;
        Ok(())
    })?;
    server.fn_handler::<anyhow::Error, _>("/style.css", Method::Get, move |req| {
        req.into_response(200, Some("OK"), &[("Content-Type", "text/css")])?
            .write_all(STYLE_CSS.as_bytes())?;
        Ok(())
    })?;
    Ok(())
}

fn read_request_body(req: &mut HttpRequest<'_, '_>) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_html(req: HttpRequest<'_, '_>, page: &str) -> anyhow::Result<()> {
    req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
        .write_all(page.as_bytes())?;
    Ok(())
}

fn write_json<T: Serialize>(req: HttpRequest<'_, '_>, payload: &T) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(req: HttpRequest<'_, '_>, status_code: u16, message: &str) -> anyhow::Result<()> {
    let payload = serde_json::json!({ "error": message });
    let body = serde_json::to_vec(&payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn spawn_control_loop(
    unit: SharedUnit,
    mut sensors: SensorSuite,
    mut subscribers: SubscriberRegistry<EspHttpWsDetachedSender>,
) {
    thread::Builder::new()
        .name("control-loop".into())
        .stack_size(12 * 1024)
        .spawn(move || {
            if let Err(err) = add_current_task_to_watchdog() {
                warn!("failed to register control loop with watchdog: {err:#}");
            }

            let tick = Duration::from_millis(lock(&unit).core().config.control_tick_ms);

            loop {
                feed_watchdog();
                let now_ms = monotonic_ms();

                // Bus transactions stay outside the lock the HTTP handlers use.
                let due = lock(&unit).sensors_due(now_ms);
                let sample = due.then(|| SensorSample::read(&mut sensors));
                let output = lock(&unit).tick(now_ms, sample);

                if let Some(payload) = output.telemetry {
                    broadcast(&mut subscribers, &PushEvent::Ping { uptime_ms: now_ms });
                    broadcast(&mut subscribers, &PushEvent::NewReadings(payload));
                }

                thread::sleep(tick);
            }
        })
        .expect("failed to spawn control loop thread");
}

fn broadcast(subscribers: &mut SubscriberRegistry<EspHttpWsDetachedSender>, event: &PushEvent) {
    let frame = match event.to_frame() {
        Ok(frame) => frame,
        Err(err) => {
            warn!("push event serialization failed: {err}");
            return;
        }
    };

    subscribers.broadcast(|sender| sender.send(FrameType::Text(false), frame.as_bytes()));
}

impl ActionSink for Actuators {
    fn apply(&mut self, actions: &[ControlAction]) {
        for action in actions {
            let result = match *action {
                ControlAction::Relay {
                    energized,
                    authority,
                } => {
                    info!(
                        "relay {} ({authority:?})",
                        if energized { "energized" } else { "released" }
                    );
                    self.relay.set_level(energized.into())
                }
                ControlAction::Buzzer(on) => self.buzzer.set_level(on.into()),
                ControlAction::StatusLed(on) => self.status_led.set_level(on.into()),
                ControlAction::StatusColor(rgb) => self.rgb.set(rgb),
            };
            if let Err(err) = result {
                warn!("failed to apply {action:?}: {err}");
            }
        }
    }
}

impl RgbLed {
    #[allow(clippy::too_many_arguments)]
    fn new(
        timer: esp_idf_hal::ledc::TIMER0,
        red_channel: esp_idf_hal::ledc::CHANNEL0,
        green_channel: esp_idf_hal::ledc::CHANNEL1,
        blue_channel: esp_idf_hal::ledc::CHANNEL2,
        red_pin: AnyOutputPin,
        green_pin: AnyOutputPin,
        blue_pin: AnyOutputPin,
    ) -> anyhow::Result<Self> {
        let timer = LedcTimerDriver::new(
            timer,
            &TimerConfig::default()
                .frequency(RGB_PWM_HZ.Hz().into())
                .resolution(LedcResolution::Bits8),
        )?;
        let mut led = Self {
            red: LedcDriver::new(red_channel, &timer, red_pin)?,
            green: LedcDriver::new(green_channel, &timer, green_pin)?,
            blue: LedcDriver::new(blue_channel, &timer, blue_pin)?,
            _timer: timer,
        };
        led.set((0, 0, 0))?;
        Ok(led)
    }

    fn set(&mut self, (r, g, b): Rgb) -> Result<(), EspError> {
        for (channel, value) in [
            (&mut self.red, r),
            (&mut self.green, g),
            (&mut self.blue, b),
        ] {
            let max = channel.get_max_duty();
            channel.set_duty(u32::from(value) * max / 255)?;
        }
        Ok(())
    }
}

impl SensorSuite {
    fn new(ds18_pin: AnyIOPin, dht_pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut one_wire_pin = PinDriver::input_output_od(ds18_pin)?;
        one_wire_pin.set_pull(Pull::Up)?;
        one_wire_pin.set_high()?;

        let mut dht_pin = PinDriver::input_output_od(dht_pin)?;
        dht_pin.set_pull(Pull::Up)?;
        dht_pin.set_high()?;

        let one_wire = OneWire::new(one_wire_pin)
            .map_err(|err| anyhow!("failed to initialize one-wire bus: {err:?}"))?;

        let mut suite = Self {
            one_wire,
            ds18_address: None,
            dht_pin,
            delay: Ets,
            cached_humidity: f32::NAN,
        };

        suite.refresh_ds18_address();
        Ok(suite)
    }

    fn refresh_ds18_address(&mut self) {
        let mut first_ds18: Option<Address> = None;
        let mut device_count = 0_u32;

        for addr in self.one_wire.devices(false, &mut self.delay) {
            match addr {
                Ok(address) => {
                    device_count = device_count.saturating_add(1);
                    if first_ds18.is_none() && address.family_code() == ds18b20::FAMILY_CODE {
                        first_ds18 = Some(address);
                    }
                }
                Err(err) => {
                    warn!("one-wire device scan failed: {err:?}");
                    break;
                }
            }
        }

        self.ds18_address = first_ds18;
        if let Some(address) = self.ds18_address {
            if let Err(err) = self.configure_ds18_resolution(address) {
                warn!("failed to set DS18B20 resolution: {err}");
                self.ds18_address = None;
            }
        }

        match self.ds18_address {
            Some(address) => info!(
                "DS18B20 ready on GPIO{DS18B20_PIN} ({device_count} one-wire device(s), using {address:?})"
            ),
            None => warn!(
                "no DS18B20 found on GPIO{DS18B20_PIN} ({device_count} one-wire device(s) detected)"
            ),
        }
    }

    fn configure_ds18_resolution(&mut self, address: Address) -> anyhow::Result<()> {
        let sensor = Ds18b20::new::<core::convert::Infallible>(address)
            .map_err(|err| anyhow!("invalid address {address:?}: {err:?}"))?;
        // Alarm registers are unused; keep the widest range.
        sensor
            .set_config(
                i8::MIN,
                i8::MAX,
                DS18B20_RESOLUTION,
                &mut self.one_wire,
                &mut self.delay,
            )
            .map_err(|err| anyhow!("{err:?}"))
    }
}

impl SensorSource for SensorSuite {
    fn read_water_temp_c(&mut self) -> f32 {
        if self.ds18_address.is_none() {
            self.refresh_ds18_address();
        }

        let Some(address) = self.ds18_address else {
            return DEVICE_DISCONNECTED_C;
        };
        let sensor = match Ds18b20::new::<core::convert::Infallible>(address) {
            Ok(sensor) => sensor,
            Err(err) => {
                warn!("invalid DS18B20 address {address:?}: {err:?}");
                self.ds18_address = None;
                return DEVICE_DISCONNECTED_C;
            }
        };

        if let Err(err) =
            ds18b20::start_simultaneous_temp_measurement(&mut self.one_wire, &mut self.delay)
        {
            warn!("failed to start DS18B20 conversion: {err:?}");
            self.ds18_address = None;
            return DEVICE_DISCONNECTED_C;
        }

        DS18B20_RESOLUTION.delay_for_measurement_time(&mut self.delay);

        match sensor.read_data(&mut self.one_wire, &mut self.delay) {
            Ok(data) => data.temperature,
            Err(err) => {
                warn!("failed to read DS18B20 data: {err:?}");
                self.ds18_address = None;
                DEVICE_DISCONNECTED_C
            }
        }
    }

    // One DHT11 transaction yields both values; humidity is kept for the next call.
    fn read_air_temp_c(&mut self) -> f32 {
        self.cached_humidity = f32::NAN;
        if let Err(err) = self.dht_pin.set_high() {
            warn!("failed to set DHT11 line high before read: {err:?}");
            return f32::NAN;
        }

        match dht11::blocking::read(&mut self.delay, &mut self.dht_pin) {
            Ok(reading) => {
                self.cached_humidity = f32::from(reading.relative_humidity);
                f32::from(reading.temperature)
            }
            Err(err) => {
                warn!("failed to read DHT11 on GPIO{DHT11_PIN}: {err:?}");
                f32::NAN
            }
        }
    }

    fn read_air_humidity(&mut self) -> f32 {
        self.cached_humidity
    }
}

impl CredentialStore for NvsCredentialStore {
    fn load(&self, key: CredentialKey) -> String {
        let _guard = lock(&self.lock);
        let mut buffer = [0_u8; NVS_VALUE_MAX];
        let result = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)
            .and_then(|nvs| nvs.get_str(key.as_str(), &mut buffer).map(|v| v.map(str::to_string)));

        match result {
            Ok(value) => value.unwrap_or_default(),
            Err(err) => {
                warn!(
                    "{}",
                    StoreError::Read {
                        key: key.as_str(),
                        reason: err.to_string(),
                    }
                );
                String::new()
            }
        }
    }

    fn save(&mut self, key: CredentialKey, value: &str) -> Result<(), StoreError> {
        let _guard = lock(&self.lock);
        EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)
            .and_then(|mut nvs| nvs.set_str(key.as_str(), value))
            .map_err(|err| StoreError::Write {
                key: key.as_str(),
                reason: err.to_string(),
            })
    }
}

impl StationLink for WifiStation<'_> {
    fn configure(&mut self, addressing: &StaticIpConfig) -> Result<(), NetworkError> {
        let conf = NetifConfiguration {
            ip_configuration: Some(IpConfiguration::Client(IpClientConfiguration::Fixed(
                IpClientSettings {
                    ip: addressing.ip,
                    subnet: Subnet {
                        gateway: addressing.gateway,
                        mask: Mask(addressing.prefix_len()),
                    },
                    dns: None,
                    secondary_dns: None,
                },
            ))),
            ..NetifConfiguration::wifi_default_client()
        };

        let netif = EspNetif::new_with_conf(&conf)
            .map_err(|err| NetworkError::Configure(err.to_string()))?;
        self.wifi
            .wifi_mut()
            .swap_netif_sta(netif)
            .map_err(|err| NetworkError::Configure(err.to_string()))?;
        Ok(())
    }

    fn begin(&mut self, ssid: &str, passphrase: &str) -> Result<(), NetworkError> {
        let auth_method = if passphrase.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        let client = ClientConfiguration {
            ssid: ssid
                .try_into()
                .map_err(|_| NetworkError::Configure("wifi ssid too long".into()))?,
            password: passphrase
                .try_into()
                .map_err(|_| NetworkError::Configure("wifi password too long".into()))?,
            auth_method,
            ..Default::default()
        };

        let join = || -> Result<(), EspError> {
            self.wifi.set_configuration(&Configuration::Client(client))?;
            self.wifi.start()?;
            // Non-blocking; the resolver polls `is_connected`.
            self.wifi.wifi_mut().connect()
        };
        join().map_err(|err| NetworkError::Join(err.to_string()))?;
        info!("wifi started, connecting to `{ssid}`");
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }
}

impl Clock for EspClock {
    fn now_ms(&self) -> u64 {
        monotonic_ms()
    }

    fn sleep_ms(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

fn start_provisioning_ap(wifi: &mut BlockingWifi<EspWifi<'static>>) -> anyhow::Result<()> {
    let ssid = option_env!("AP_SSID").unwrap_or(DEFAULT_AP_SSID);
    let password = option_env!("AP_PASS").unwrap_or("");
    let auth_method = if password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };

    wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
        ssid: ssid
            .try_into()
            .map_err(|_| anyhow!("provisioning AP SSID too long"))?,
        password: password
            .try_into()
            .map_err(|_| anyhow!("provisioning AP password too long"))?,
        auth_method,
        channel: 1,
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.wait_netif_up()?;

    let ap_ip = wifi.wifi().ap_netif().get_ip_info()?.ip;
    info!("provisioning AP `{ssid}` started, portal at http://{ap_ip}/");
    Ok(())
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
