use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::ops::AddAssign;

use chrono::NaiveDate;

use super::resolve::ResolvedRecord;


/// The three case counters tracked per location and day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
	Confirmed,
	Recovered,
	Dead,
}

impl Metric {
	pub const ALL: [Metric; 3] = [Metric::Confirmed, Metric::Recovered, Metric::Dead];

	/// Key prefix used for this metric in the published items.
	pub fn api_key(&self) -> &'static str {
		match self {
			Self::Confirmed => "confirmed",
			Self::Recovered => "recovered",
			Self::Dead => "dead",
		}
	}
}


#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaseCounts {
	pub confirmed: u64,
	pub recovered: u64,
	pub deaths: u64,
}

impl CaseCounts {
	pub fn of_record(rec: &ResolvedRecord) -> Self {
		Self{
			confirmed: rec.record.confirmed,
			recovered: rec.record.recovered,
			deaths: rec.record.deaths,
		}
	}

	pub fn get(&self, metric: Metric) -> u64 {
		match metric {
			Metric::Confirmed => self.confirmed,
			Metric::Recovered => self.recovered,
			Metric::Dead => self.deaths,
		}
	}
}

impl AddAssign for CaseCounts {
	fn add_assign(&mut self, other: Self) {
		self.confirmed += other.confirmed;
		self.recovered += other.recovered;
		self.deaths += other.deaths;
	}
}


/// Aggregated counts for one unit and day plus one record of the group to
/// carry the unit's descriptive fields.
#[derive(Debug, Clone, Copy)]
pub struct DayGroup {
	pub counts: CaseCounts,
	pub exemplar: usize,
}


/// Date-ordered totals of one administrative unit.
///
/// Days with no reporting are simply absent; the statistics treat a missing
/// previous day as the start of the series, so the map must not be padded.
#[derive(Debug, Clone, Default)]
pub struct UnitSeries {
	pub days: BTreeMap<NaiveDate, DayGroup>,
}

impl UnitSeries {
	pub fn last_date(&self) -> Option<NaiveDate> {
		self.days.keys().next_back().copied()
	}

	pub fn metric_series(&self, metric: Metric) -> BTreeMap<NaiveDate, u64> {
		self.days.iter()
			.map(|(&date, group)| (date, group.counts.get(metric)))
			.collect()
	}
}


/// All records grouped by a unit key and the report date.
pub struct GroupedSeries<K> {
	pub units: HashMap<K, UnitSeries>,
}

impl<K: Hash + Eq> GroupedSeries<K> {
	/// Groups the records; records the key function maps to `None` do not
	/// belong to this layer and are skipped.
	pub fn build<KF>(records: &[ResolvedRecord], key_fn: KF) -> Self
		where KF: Fn(&ResolvedRecord) -> Option<K>,
	{
		let mut units: HashMap<K, UnitSeries> = HashMap::new();
		for (index, rec) in records.iter().enumerate() {
			let key = match key_fn(rec) {
				Some(k) => k,
				None => continue,
			};
			let unit = units.entry(key).or_default();
			let day = unit.days.entry(rec.record.date).or_insert(DayGroup{
				counts: CaseCounts::default(),
				exemplar: index,
			});
			day.counts += CaseCounts::of_record(rec);
		}
		Self{units}
	}

	pub fn get(&self, key: &K) -> Option<&UnitSeries> {
		self.units.get(key)
	}
}
