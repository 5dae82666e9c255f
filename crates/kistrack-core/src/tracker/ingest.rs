// ── Protocol ingestion ──
//
// Positional handlers for the sentences the tracker subscribes to. Each
// line is applied under a single write-lock acquisition. `PHYMAP` commits
// counters in wire order and stops at the first unparseable one, leaving
// the prefix (and a freshly announced PHY) in place.

use strum::IntoEnumIterator;
use tracing::{debug, info};

use super::DeviceTracker;
use crate::model::PhyId;
use crate::store::{CounterField, PhyObservation};

pub const PHYMAP_PROTOCOL: &str = "PHYMAP";
pub const DEVICE_PROTOCOL: &str = "DEVICE";

/// Fields requested for `PHYMAP`, in the order the handler consumes them.
pub const PHYMAP_FIELDS: &[&str] = &[
    "phyid",
    "phyname",
    "packets",
    "datapackets",
    "errorpackets",
    "filterpackets",
    "packetrate",
];

/// Why a line was discarded without touching any state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    TooFewFields { got: usize, need: usize },
    InvalidPhyId { value: String },
}

/// What ingesting one line did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Nothing changed.
    Dropped(DropReason),
    Applied {
        /// The line announced a PHY the tracker had not seen before.
        new_phy: bool,
        /// Counters written, counted from the first.
        counters_committed: usize,
        /// The counter that failed to parse, if ingestion stopped early.
        stopped_at: Option<CounterField>,
    },
    /// The sentence is accepted but carries no schema this client decodes.
    Unsupported,
}

impl DeviceTracker {
    /// Apply one `PHYMAP` sentence laid out as [`PHYMAP_FIELDS`].
    pub fn handle_phymap<S: AsRef<str>>(&self, fields: &[S]) -> IngestOutcome {
        let need = PHYMAP_FIELDS.len();
        if fields.len() < need {
            debug!(got = fields.len(), need, "dropping short PHYMAP line");
            return IngestOutcome::Dropped(DropReason::TooFewFields {
                got: fields.len(),
                need,
            });
        }

        let raw_id = fields[0].as_ref();
        let Some(phy_id) = parse_decimal::<u32>(raw_id).map(PhyId::new) else {
            debug!(value = raw_id, "dropping PHYMAP line with invalid phy id");
            return IngestOutcome::Dropped(DropReason::InvalidPhyId {
                value: raw_id.to_owned(),
            });
        };

        let mut state = self.write();

        let new_phy = !state.phys.contains(phy_id);
        if new_phy {
            let phy_name = fields[1].as_ref();
            let observation = state.phys.observe_phy(phy_id, phy_name);
            state.devices.ensure_phy(phy_id);
            let bound = matches!(observation, PhyObservation::New { bound: true });
            info!(phy_id = phy_id.get(), phy_name, bound, "new PHY");
        }

        let mut counters_committed = 0;
        let mut stopped_at = None;
        for (field, raw) in CounterField::iter().zip(&fields[2..]) {
            let Some(value) = parse_decimal::<u64>(raw.as_ref()) else {
                debug!(
                    phy_id = phy_id.get(),
                    field = field.wire_name(),
                    value = raw.as_ref(),
                    "stopping PHYMAP ingest at unparseable counter"
                );
                stopped_at = Some(field);
                break;
            };
            state.counters.commit(phy_id, field, value);
            counters_committed += 1;
        }

        IngestOutcome::Applied {
            new_phy,
            counters_committed,
            stopped_at,
        }
    }

    /// `DEVICE` sentences are subscribed to but not decoded.
    #[allow(clippy::unused_self)]
    pub fn handle_device<S: AsRef<str>>(&self, fields: &[S]) -> IngestOutcome {
        info!(fields = fields.len(), "DEVICE sentence received; no decoder available");
        IngestOutcome::Unsupported
    }
}

/// Plain unsigned decimal: digits only, no sign, no whitespace.
fn parse_decimal<T: std::str::FromStr>(raw: &str) -> Option<T> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::KIS_PHY_ANY;
    use crate::store::phys::tests::TestFactory;
    use pretty_assertions::assert_eq;

    const ONE: PhyId = PhyId::new(1);
    const TWO: PhyId = PhyId::new(2);

    fn line(raw: &str) -> Vec<&str> {
        raw.split_whitespace().collect()
    }

    fn all_counters(tracker: &DeviceTracker, phy: PhyId) -> [u64; 5] {
        [
            tracker.count_packets(phy),
            tracker.count_data_packets(phy),
            tracker.count_error_packets(phy),
            tracker.count_filter_packets(phy),
            tracker.packet_rate(phy),
        ]
    }

    #[test]
    fn short_line_changes_nothing() {
        let tracker = DeviceTracker::new();
        let outcome = tracker.handle_phymap(&line("1 802.11 100 80 5"));

        assert_eq!(
            outcome,
            IngestOutcome::Dropped(DropReason::TooFewFields { got: 5, need: 7 })
        );
        assert!(tracker.phys().is_empty());
        assert!(tracker.devices_for(ONE).is_none());
        assert_eq!(all_counters(&tracker, ONE), [0; 5]);
        assert_eq!(all_counters(&tracker, PhyId::new(0)), [0; 5]);
    }

    #[test]
    fn invalid_phy_id_changes_nothing() {
        let tracker = DeviceTracker::new();
        for bad in ["x1", "-1", "+1", "", "4294967296"] {
            let mut fields = line("802.11 100 80 5 2 10");
            fields.insert(0, bad);
            assert_eq!(
                tracker.handle_phymap(&fields),
                IngestOutcome::Dropped(DropReason::InvalidPhyId { value: bad.to_owned() })
            );
        }
        assert!(tracker.phys().is_empty());
        assert_eq!(tracker.count_packets(KIS_PHY_ANY), 0);
    }

    #[test]
    fn bad_filter_field_commits_the_prefix() {
        let tracker = DeviceTracker::new();
        let outcome = tracker.handle_phymap(&line("1 802.11 100 80 5 oops 10"));

        assert_eq!(
            outcome,
            IngestOutcome::Applied {
                new_phy: true,
                counters_committed: 3,
                stopped_at: Some(CounterField::FilterPackets),
            }
        );
        assert_eq!(tracker.phys().len(), 1);
        assert_eq!(all_counters(&tracker, ONE), [100, 80, 5, 0, 0]);
    }

    #[test]
    fn later_fields_keep_their_prior_value() {
        let tracker = DeviceTracker::new();
        tracker.handle_phymap(&line("1 802.11 100 80 5 2 10"));
        tracker.handle_phymap(&line("1 802.11 120 85 6 -3 99"));
        assert_eq!(all_counters(&tracker, ONE), [120, 85, 6, 2, 10]);
    }

    #[test]
    fn bad_first_counter_still_announces_the_phy() {
        let tracker = DeviceTracker::new();
        let outcome = tracker.handle_phymap(&line("3 RTL433 many 0 0 0 0"));
        assert_eq!(
            outcome,
            IngestOutcome::Applied {
                new_phy: true,
                counters_committed: 0,
                stopped_at: Some(CounterField::Packets),
            }
        );
        assert_eq!(tracker.phys()[0].phy_name, "RTL433");
        assert_eq!(tracker.devices_for(PhyId::new(3)).unwrap().len(), 0);
    }

    #[test]
    fn repeated_announcement_registers_the_phy_once() {
        let tracker = DeviceTracker::new();
        let first = tracker.handle_phymap(&line("1 802.11 100 80 5 2 10"));
        let second = tracker.handle_phymap(&line("1 802.11 150 90 6 2 15"));

        assert!(matches!(first, IngestOutcome::Applied { new_phy: true, .. }));
        assert_eq!(
            second,
            IngestOutcome::Applied {
                new_phy: false,
                counters_committed: 5,
                stopped_at: None,
            }
        );
        assert_eq!(tracker.count_packets(ONE), 150);
        assert_eq!(tracker.count_data_packets(ONE), 90);
        assert_eq!(tracker.phys().len(), 1);
    }

    #[test]
    fn known_phy_ignores_the_name_field() {
        let tracker = DeviceTracker::new();
        tracker.handle_phymap(&line("1 802.11 1 1 1 1 1"));
        tracker.handle_phymap(&line("1 renamed 2 2 2 2 2"));
        assert_eq!(tracker.phys()[0].phy_name, "802.11");
        assert_eq!(tracker.count_packets(ONE), 2);
    }

    #[test]
    fn global_totals_follow_their_own_accumulation() {
        let tracker = DeviceTracker::new();
        tracker.handle_phymap(&line("1 802.11 10 0 0 0 4"));
        tracker.handle_phymap(&line("2 BTLE 5 0 0 0 1"));

        assert_eq!(tracker.count_packets(ONE), 10);
        assert_eq!(tracker.count_packets(TWO), 5);
        assert_eq!(tracker.count_packets(KIS_PHY_ANY), 15);

        // PHY 1's server counter restarts: per-PHY mirrors it, the global
        // total only ever grows.
        tracker.handle_phymap(&line("1 802.11 3 0 0 0 2"));
        assert_eq!(tracker.count_packets(ONE), 3);
        assert_eq!(tracker.count_packets(KIS_PHY_ANY), 15);
        assert_eq!(tracker.packet_rate(KIS_PHY_ANY), 3);
        assert_eq!(tracker.count_packets(PhyId::new(7)), 0);
    }

    #[test]
    fn announcement_binds_a_waiting_factory() {
        let tracker = DeviceTracker::new();
        let (factory, created) = TestFactory::boxed("802.11");
        tracker.register_phy_handler_factory(factory);

        tracker.handle_phymap(&line("1 802.11 0 0 0 0 0"));
        tracker.handle_phymap(&line("1 802.11 0 0 0 0 0"));

        assert_eq!(created.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(tracker.phy_handler_for(ONE).is_some());
        assert!(tracker.pending_factories().is_empty());
    }

    #[test]
    fn extra_fields_are_ignored() {
        let tracker = DeviceTracker::new();
        let outcome = tracker.handle_phymap(&line("1 802.11 1 2 3 4 5 6 7"));
        assert!(matches!(
            outcome,
            IngestOutcome::Applied {
                counters_committed: 5,
                stopped_at: None,
                ..
            }
        ));
        assert_eq!(all_counters(&tracker, ONE), [1, 2, 3, 4, 5]);
    }

    #[test]
    fn device_sentences_are_accepted_but_not_decoded() {
        let tracker = DeviceTracker::new();
        assert_eq!(
            tracker.handle_device(&line("00:11:22:33:44:55 1 17")),
            IngestOutcome::Unsupported
        );
        assert_eq!(tracker.count_devices(KIS_PHY_ANY), 0);
    }

    #[test]
    fn decimal_parsing_is_strict() {
        assert_eq!(parse_decimal::<u64>("0042"), Some(42));
        assert_eq!(parse_decimal::<u64>(" 1"), None);
        assert_eq!(parse_decimal::<u64>("1.5"), None);
        assert_eq!(parse_decimal::<u32>("99999999999"), None);
    }
}
