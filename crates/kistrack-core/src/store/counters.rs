// ── Traffic counter store ──
//
// Per-PHY tallies mirror the latest values the server reported. Global
// totals are accumulated separately as each per-PHY value is committed
// and are never recomputed from the per-PHY map:
//
// - cumulative counters add only positive deltas, so they stay monotonic
//   across a server-side counter reset;
// - packet rate is instantaneous and follows `new - old` in both directions.

use std::collections::HashMap;

use serde::Serialize;
use strum::{EnumIter, IntoStaticStr};

use crate::model::{PhyFilter, PhyId};

/// One of the five positional counters carried by a `PHYMAP` sentence,
/// in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum CounterField {
    Packets,
    DataPackets,
    ErrorPackets,
    FilterPackets,
    PacketRate,
}

impl CounterField {
    /// Wire field name (`"datapackets"`, ...).
    pub fn wire_name(self) -> &'static str {
        self.into()
    }
}

/// The five tallies kept per PHY and globally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhyCounters {
    pub packets: u64,
    pub data_packets: u64,
    pub error_packets: u64,
    pub filter_packets: u64,
    pub packet_rate: u64,
}

impl PhyCounters {
    pub fn get(&self, field: CounterField) -> u64 {
        match field {
            CounterField::Packets => self.packets,
            CounterField::DataPackets => self.data_packets,
            CounterField::ErrorPackets => self.error_packets,
            CounterField::FilterPackets => self.filter_packets,
            CounterField::PacketRate => self.packet_rate,
        }
    }

    fn slot(&mut self, field: CounterField) -> &mut u64 {
        match field {
            CounterField::Packets => &mut self.packets,
            CounterField::DataPackets => &mut self.data_packets,
            CounterField::ErrorPackets => &mut self.error_packets,
            CounterField::FilterPackets => &mut self.filter_packets,
            CounterField::PacketRate => &mut self.packet_rate,
        }
    }
}

#[derive(Default)]
pub(crate) struct CounterStore {
    per_phy: HashMap<PhyId, PhyCounters>,
    global: PhyCounters,
}

impl CounterStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record the latest server value of `field` for `phy` and fold the
    /// change into the global total.
    pub(crate) fn commit(&mut self, phy: PhyId, field: CounterField, value: u64) {
        let slot = self.per_phy.entry(phy).or_default().slot(field);
        let old = std::mem::replace(slot, value);

        let total = self.global.slot(field);
        if field == CounterField::PacketRate {
            *total = total.saturating_sub(old).saturating_add(value);
        } else if value > old {
            *total = total.saturating_add(value - old);
        }
    }

    /// Global total for `Any`, the per-PHY value otherwise (0 if unknown).
    pub(crate) fn get(&self, filter: PhyFilter, field: CounterField) -> u64 {
        match filter {
            PhyFilter::Any => self.global.get(field),
            PhyFilter::Phy(phy) => self.per_phy.get(&phy).map_or(0, |c| c.get(field)),
        }
    }

    pub(crate) fn phy(&self, phy: PhyId) -> PhyCounters {
        self.per_phy.get(&phy).copied().unwrap_or_default()
    }

    pub(crate) fn global(&self) -> PhyCounters {
        self.global
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    const ONE: PhyId = PhyId::new(1);
    const TWO: PhyId = PhyId::new(2);

    #[test]
    fn wire_names_follow_field_order() {
        let names: Vec<&str> = CounterField::iter().map(CounterField::wire_name).collect();
        assert_eq!(
            names,
            vec!["packets", "datapackets", "errorpackets", "filterpackets", "packetrate"]
        );
    }

    #[test]
    fn unknown_phy_reads_zero() {
        let store = CounterStore::new();
        assert_eq!(store.get(PhyFilter::Phy(ONE), CounterField::Packets), 0);
        assert_eq!(store.get(PhyFilter::Any, CounterField::Packets), 0);
    }

    #[test]
    fn per_phy_values_are_replaced_not_summed() {
        let mut store = CounterStore::new();
        store.commit(ONE, CounterField::Packets, 100);
        store.commit(ONE, CounterField::Packets, 150);
        assert_eq!(store.get(PhyFilter::Phy(ONE), CounterField::Packets), 150);
        assert_eq!(store.get(PhyFilter::Any, CounterField::Packets), 150);
    }

    #[test]
    fn global_totals_survive_a_server_counter_reset() {
        let mut store = CounterStore::new();
        store.commit(ONE, CounterField::Packets, 10);
        store.commit(TWO, CounterField::Packets, 5);
        assert_eq!(store.get(PhyFilter::Any, CounterField::Packets), 15);

        // Server restarted PHY 1's counter.
        store.commit(ONE, CounterField::Packets, 4);
        assert_eq!(store.get(PhyFilter::Phy(ONE), CounterField::Packets), 4);
        assert_eq!(store.get(PhyFilter::Any, CounterField::Packets), 15);

        store.commit(ONE, CounterField::Packets, 6);
        assert_eq!(store.get(PhyFilter::Any, CounterField::Packets), 17);
    }

    #[test]
    fn global_packet_rate_tracks_current_rates() {
        let mut store = CounterStore::new();
        store.commit(ONE, CounterField::PacketRate, 10);
        store.commit(TWO, CounterField::PacketRate, 3);
        store.commit(ONE, CounterField::PacketRate, 2);
        assert_eq!(store.get(PhyFilter::Any, CounterField::PacketRate), 5);
        assert_eq!(store.phy(TWO).packet_rate, 3);
        assert_eq!(store.global().packet_rate, 5);
    }
}
