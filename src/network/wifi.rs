//! Dual-role radio: always-on local AP plus a best-effort station uplink.
//!
//! Raw `esp_event_handler_register` callbacks feed driver transitions into
//! the [`LinkState`] table; the table's verdict drives `esp_netif_napt_*`
//! on the AP interface. The AP keeps serving with NAPT off whenever the
//! uplink has no valid address.

use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::handle::RawHandle;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
};
use log::{debug, info, warn};
use stream_core::link::{LinkEvent, LinkState, NaptAction, StaState};

use crate::config::Config;

struct LinkShared {
    state: Mutex<LinkState>,
    changed: Condvar,
    /// Raw AP netif handle, target of the NAPT toggles. Set once before the
    /// event handlers are registered.
    ap_netif: AtomicPtr<esp_idf_sys::esp_netif_obj>,
}

/// Event handlers run on the system event task and have no other way to
/// reach the manager.
static LINK: OnceLock<Arc<LinkShared>> = OnceLock::new();

pub struct WifiManager {
    wifi: EspWifi<'static>,
    link: Arc<LinkShared>,
    sta_ssid: String,
}

impl WifiManager {
    pub fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        config: &Config,
    ) -> Result<Self> {
        if config.ap_ssid.is_empty() {
            bail!("AP SSID cannot be empty");
        }
        if config.sta_ssid.is_empty() {
            bail!("station SSID cannot be empty; see wifi_config.h.example");
        }

        let mut wifi = EspWifi::new(modem, sys_loop, Some(nvs))?;

        let client_config = ClientConfiguration {
            ssid: config
                .sta_ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("station SSID too long"))?,
            password: config
                .sta_password
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("station password too long"))?,
            auth_method: if config.sta_password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        };
        let ap_config = AccessPointConfiguration {
            ssid: config
                .ap_ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("AP SSID too long"))?,
            password: config
                .ap_password
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("AP password too long"))?,
            auth_method: if config.ap_password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        };
        wifi.set_configuration(&Configuration::Mixed(client_config, ap_config))?;

        let link = Arc::new(LinkShared {
            state: Mutex::new(LinkState::default()),
            changed: Condvar::new(),
            ap_netif: AtomicPtr::new(core::ptr::null_mut()),
        });
        link.ap_netif
            .store(wifi.ap_netif().handle(), Ordering::Release);
        if LINK.set(link.clone()).is_err() {
            bail!("wifi manager already initialized");
        }
        register_event_handlers()?;

        Ok(Self {
            wifi,
            link,
            sta_ssid: config.sta_ssid.clone(),
        })
    }

    /// Starts the radio and waits a bounded time for the uplink address.
    /// Timeout is not an error: the AP keeps serving locally.
    pub fn start(&mut self, uplink_timeout: Duration) -> Result<()> {
        self.wifi.start()?;
        info!("Connecting station uplink to '{}'", self.sta_ssid);
        if let Err(e) = self.wifi.connect() {
            warn!("uplink connect failed: {e}");
        }

        let guard = self
            .link
            .state
            .lock()
            .map_err(|_| anyhow!("link state poisoned"))?;
        let (state, timeout) = self
            .link
            .changed
            .wait_timeout_while(guard, uplink_timeout, |s| s.sta != StaState::Connected)
            .map_err(|_| anyhow!("link state poisoned"))?;
        if timeout.timed_out() {
            warn!(
                "uplink not connected after {}s, serving AP-only",
                uplink_timeout.as_secs()
            );
        } else {
            drop(state);
            if let Some(ip) = self.sta_ip() {
                info!("Station uplink connected: {ip}");
            }
        }
        Ok(())
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state.lock().map(|s| *s).unwrap_or_default()
    }

    pub fn sta_ip(&self) -> Option<String> {
        self.wifi
            .sta_netif()
            .get_ip_info()
            .ok()
            .filter(|info| !info.ip.is_unspecified())
            .map(|info| info.ip.to_string())
    }

    pub fn ap_ip(&self) -> Option<String> {
        self.wifi
            .ap_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip.to_string())
    }
}

fn register_event_handlers() -> Result<()> {
    unsafe {
        use esp_idf_sys::*;
        esp!(esp_event_handler_register(
            WIFI_EVENT,
            ESP_EVENT_ANY_ID,
            Some(on_wifi_event),
            core::ptr::null_mut(),
        ))?;
        esp!(esp_event_handler_register(
            IP_EVENT,
            ESP_EVENT_ANY_ID,
            Some(on_ip_event),
            core::ptr::null_mut(),
        ))?;
    }
    Ok(())
}

unsafe extern "C" fn on_wifi_event(
    _arg: *mut core::ffi::c_void,
    _event_base: esp_idf_sys::esp_event_base_t,
    event_id: i32,
    _event_data: *mut core::ffi::c_void,
) {
    use esp_idf_sys::*;
    let event = match event_id as u32 {
        x if x == wifi_event_t_WIFI_EVENT_AP_START => LinkEvent::ApStarted,
        x if x == wifi_event_t_WIFI_EVENT_AP_STOP => LinkEvent::ApStopped,
        x if x == wifi_event_t_WIFI_EVENT_STA_START => LinkEvent::StaStarted,
        x if x == wifi_event_t_WIFI_EVENT_STA_CONNECTED => LinkEvent::StaConnected,
        x if x == wifi_event_t_WIFI_EVENT_STA_DISCONNECTED => LinkEvent::StaDisconnected,
        _ => return,
    };
    dispatch(event);
}

unsafe extern "C" fn on_ip_event(
    _arg: *mut core::ffi::c_void,
    _event_base: esp_idf_sys::esp_event_base_t,
    event_id: i32,
    _event_data: *mut core::ffi::c_void,
) {
    use esp_idf_sys::*;
    let event = match event_id as u32 {
        x if x == ip_event_t_IP_EVENT_STA_GOT_IP => LinkEvent::StaGotIp,
        x if x == ip_event_t_IP_EVENT_STA_LOST_IP => LinkEvent::StaLostIp,
        _ => return,
    };
    dispatch(event);
}

/// Applies one driver transition in arrival order. Runs on the system event
/// task; keep it short.
fn dispatch(event: LinkEvent) {
    let Some(shared) = LINK.get() else {
        return;
    };
    let action = match shared.state.lock() {
        Ok(mut state) => {
            let action = state.apply(event);
            debug!("link event {event:?} -> {:?}", *state);
            action
        }
        Err(_) => return,
    };
    if let Some(action) = action {
        apply_napt(shared, action);
    }
    shared.changed.notify_all();
}

fn apply_napt(shared: &LinkShared, action: NaptAction) {
    let netif = shared.ap_netif.load(Ordering::Acquire);
    if netif.is_null() {
        return;
    }
    let err = unsafe {
        match action {
            NaptAction::Enable => esp_idf_sys::esp_netif_napt_enable(netif),
            NaptAction::Disable => esp_idf_sys::esp_netif_napt_disable(netif),
        }
    };
    if err == esp_idf_sys::ESP_OK {
        info!(
            "NAPT {}",
            match action {
                NaptAction::Enable => "enabled",
                NaptAction::Disable => "disabled",
            }
        );
    } else {
        warn!("NAPT {action:?} failed: {err}");
    }
}
