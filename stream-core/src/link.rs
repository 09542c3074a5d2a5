//! Link-state reaction table for the dual-role radio.
//!
//! The access point stays advertised once started; the station uplink cycles
//! through connect/got-ip/lost transitions. NAPT between the AP subnet and
//! the uplink is enabled exactly while the station holds a valid address.
//! Events are applied strictly in arrival order and never coalesced.

/// Station uplink state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaState {
    #[default]
    Disconnected,
    /// Started or associated, no address yet.
    Connecting,
    /// Associated with a valid address.
    Connected,
}

/// Link transitions reported by the radio driver, in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    ApStarted,
    ApStopped,
    StaStarted,
    StaConnected,
    StaGotIp,
    StaLostIp,
    StaDisconnected,
}

/// Address-translation change requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaptAction {
    Enable,
    Disable,
}

/// Current link status. Mutated only through [`LinkState::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkState {
    pub ap_up: bool,
    pub sta: StaState,
    pub napt_enabled: bool,
}

impl LinkState {
    /// Applies one link event and returns the NAPT change it requires, if
    /// any. Invariant afterwards: `napt_enabled` iff the station is
    /// connected with a valid address.
    pub fn apply(&mut self, event: LinkEvent) -> Option<NaptAction> {
        match event {
            LinkEvent::ApStarted => {
                self.ap_up = true;
                None
            }
            LinkEvent::ApStopped => {
                self.ap_up = false;
                None
            }
            LinkEvent::StaStarted | LinkEvent::StaConnected => {
                self.sta = StaState::Connecting;
                // Associating invalidates any previously held address.
                self.retract_napt()
            }
            LinkEvent::StaGotIp => {
                self.sta = StaState::Connected;
                if self.napt_enabled {
                    None
                } else {
                    self.napt_enabled = true;
                    Some(NaptAction::Enable)
                }
            }
            LinkEvent::StaLostIp | LinkEvent::StaDisconnected => {
                self.sta = StaState::Disconnected;
                self.retract_napt()
            }
        }
    }

    fn retract_napt(&mut self) -> Option<NaptAction> {
        if self.napt_enabled {
            self.napt_enabled = false;
            Some(NaptAction::Disable)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn connect_address_loss_sequence() {
        let mut link = LinkState::default();
        let actions: Vec<_> = [
            LinkEvent::ApStarted,
            LinkEvent::StaStarted,
            LinkEvent::StaConnected,
            LinkEvent::StaGotIp,
            LinkEvent::StaLostIp,
        ]
        .into_iter()
        .map(|ev| link.apply(ev))
        .collect();

        // {connect, get-address, lose-address} -> {disabled, enabled,
        // disabled} with no extra transitions.
        assert_eq!(
            actions,
            vec![None, None, None, Some(NaptAction::Enable), Some(NaptAction::Disable)]
        );
        assert!(!link.napt_enabled);
        assert_eq!(link.sta, StaState::Disconnected);
        assert!(link.ap_up);
    }

    #[test]
    fn disconnect_without_address_requests_nothing() {
        let mut link = LinkState::default();
        assert_eq!(link.apply(LinkEvent::StaConnected), None);
        assert_eq!(link.apply(LinkEvent::StaDisconnected), None);
    }

    #[test]
    fn duplicate_got_ip_is_idempotent() {
        let mut link = LinkState::default();
        assert_eq!(link.apply(LinkEvent::StaGotIp), Some(NaptAction::Enable));
        assert_eq!(link.apply(LinkEvent::StaGotIp), None);
        assert!(link.napt_enabled);
    }

    #[test]
    fn reassociation_retracts_stale_address() {
        let mut link = LinkState::default();
        link.apply(LinkEvent::StaGotIp);
        // Driver re-associates before reporting the address lost.
        assert_eq!(link.apply(LinkEvent::StaConnected), Some(NaptAction::Disable));
        assert_eq!(link.sta, StaState::Connecting);
    }

    fn any_event() -> impl Strategy<Value = LinkEvent> {
        prop_oneof![
            Just(LinkEvent::ApStarted),
            Just(LinkEvent::ApStopped),
            Just(LinkEvent::StaStarted),
            Just(LinkEvent::StaConnected),
            Just(LinkEvent::StaGotIp),
            Just(LinkEvent::StaLostIp),
            Just(LinkEvent::StaDisconnected),
        ]
    }

    proptest! {
        /// NAPT enabled iff the station holds a valid address, for every
        /// prefix of every event order, and an action is emitted exactly
        /// when the flag flips.
        #[test]
        fn napt_iff_sta_connected(events in prop::collection::vec(any_event(), 0..64)) {
            let mut link = LinkState::default();
            for ev in events {
                let before = link.napt_enabled;
                let action = link.apply(ev);
                prop_assert_eq!(link.napt_enabled, link.sta == StaState::Connected);
                match action {
                    Some(NaptAction::Enable) => prop_assert!(!before && link.napt_enabled),
                    Some(NaptAction::Disable) => prop_assert!(before && !link.napt_enabled),
                    None => prop_assert_eq!(before, link.napt_enabled),
                }
            }
        }
    }
}
