use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;

use log::info;

use rayon::prelude::*;

use serde::ser::{Serialize, SerializeMap, Serializer};

use smartstring::alias::String as SmartString;

use super::crossref::{MetroCrosswalk, MetroMember};
use super::resolve::ResolvedRecord;
use super::series::{GroupedSeries, Metric, UnitSeries};
use super::stats::{unit_stats, MetricStats, UnitStats};


/// Position of an item in the administrative hierarchy.
///
/// Serializes to the numeric levels of the public API, where metro areas
/// and cities sit between states and counties.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdminLevel {
	Region,
	Country,
	State,
	Metro,
	City,
	County,
}

impl Serialize for AdminLevel {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		match self {
			Self::Region => serializer.serialize_i64(-1),
			Self::Country => serializer.serialize_i64(0),
			Self::State => serializer.serialize_i64(1),
			Self::Metro => serializer.serialize_f64(1.5),
			Self::City => serializer.serialize_f64(1.7),
			Self::County => serializer.serialize_i64(2),
		}
	}
}


/// Identifiers replace anything that would need URL escaping.
pub fn format_id(raw: &str) -> SmartString {
	raw.replace(' ', "_").replace('&', "_").into()
}


/// One published document: a location, a date and the derived statistics.
#[derive(Debug, Clone)]
pub struct OutputItem {
	pub date: NaiveDate,
	pub name: SmartString,
	pub location_id: SmartString,
	pub admin_level: AdminLevel,
	pub lat: Option<f64>,
	pub long: Option<f64>,
	pub iso3: Option<SmartString>,
	pub country_name: Option<SmartString>,
	pub country_iso3: Option<SmartString>,
	pub state_name: Option<SmartString>,
	pub state_iso3: Option<SmartString>,
	pub cbsa: Option<SmartString>,
	pub population: Option<u64>,
	pub country_population: Option<u64>,
	pub wb_region: Option<SmartString>,
	pub num_subnational: Option<u64>,
	pub gdp: Option<(u16, f64)>,
	pub sub_parts: Option<Vec<MetroMember>>,
	pub testing: Option<serde_json::Map<String, serde_json::Value>>,
	pub stats: UnitStats,
}

impl OutputItem {
	fn item_id(&self) -> SmartString {
		let mut id = self.location_id.clone();
		id.push('_');
		id.push_str(&self.date.format("%Y-%m-%d").to_string());
		id
	}
}

fn serialize_metric<M: SerializeMap>(map: &mut M, metric: Metric, stats: &MetricStats) -> Result<(), M::Error> {
	let key = |suffix: &str| {
		let mut key = String::from(metric.api_key());
		key.push_str(suffix);
		key
	};
	map.serialize_entry(metric.api_key(), &stats.value)?;
	if let Some(v) = stats.rolling {
		map.serialize_entry(&key("_rolling"), &v)?;
	}
	if let Some(v) = stats.rolling_14days_ago {
		map.serialize_entry(&key("_rolling_14days_ago"), &v)?;
	}
	if let Some(v) = stats.rolling_14days_ago_diff {
		map.serialize_entry(&key("_rolling_14days_ago_diff"), &v)?;
	}
	if let Some(v) = stats.doubling_rate {
		map.serialize_entry(&key("_doublingRate"), &v)?;
	}
	let first_date = match stats.first_date {
		Some(date) => date.format("%Y-%m-%d").to_string(),
		None => String::new(),
	};
	map.serialize_entry(&key("_firstDate"), &first_date)?;
	map.serialize_entry(&key("_newToday"), &stats.new_today)?;
	map.serialize_entry(&key("_numIncrease"), &stats.num_increase)?;
	if let Some(v) = stats.pct_increase {
		map.serialize_entry(&key("_pctIncrease"), &v)?;
	}
	Ok(())
}

impl Serialize for OutputItem {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(None)?;
		map.serialize_entry("date", &self.date.format("%Y-%m-%d").to_string())?;
		map.serialize_entry("name", &self.name)?;
		if let Some(v) = &self.country_name {
			map.serialize_entry("country_name", v)?;
		}
		if let Some(v) = &self.iso3 {
			map.serialize_entry("iso3", v)?;
		}
		if let Some(v) = &self.state_name {
			map.serialize_entry("state_name", v)?;
		}
		if let Some(v) = &self.state_iso3 {
			map.serialize_entry("state_iso3", v)?;
		}
		if let Some(v) = &self.country_iso3 {
			map.serialize_entry("country_iso3", v)?;
		}
		if let Some(v) = &self.cbsa {
			map.serialize_entry("cbsa", v)?;
		}
		if let Some(v) = self.lat {
			map.serialize_entry("lat", &v)?;
		}
		if let Some(v) = self.long {
			map.serialize_entry("long", &v)?;
		}
		if let Some(v) = self.population {
			map.serialize_entry("population", &v)?;
		}
		if let Some(v) = self.country_population {
			map.serialize_entry("country_population", &v)?;
		}
		if let Some(v) = &self.wb_region {
			map.serialize_entry("wb_region", v)?;
		}
		map.serialize_entry("location_id", &self.location_id)?;
		map.serialize_entry("_id", &self.item_id())?;
		map.serialize_entry("admin_level", &self.admin_level)?;
		if let Some(v) = self.num_subnational {
			map.serialize_entry("num_subnational", &v)?;
		}
		if let Some((year, value)) = self.gdp {
			map.serialize_entry("gdp_last_updated", &year.to_string())?;
			let key = if self.admin_level == AdminLevel::Country {
				"gdp_per_capita"
			} else {
				"country_gdp_per_capita"
			};
			map.serialize_entry(key, &value)?;
		}
		if let Some(parts) = &self.sub_parts {
			map.serialize_entry("sub_parts", parts)?;
		}
		if let Some(testing) = &self.testing {
			for (k, v) in testing.iter() {
				let mut key = String::from("testing_");
				key.push_str(k);
				map.serialize_entry(&key, v)?;
			}
		}
		map.serialize_entry("mostRecent", &self.stats.most_recent)?;
		for metric in Metric::ALL.iter() {
			serialize_metric(&mut map, *metric, self.stats.metric(*metric))?;
		}
		if let Some(v) = self.stats.first_dead_minus_first_confirmed {
			map.serialize_entry("first_dead-first_confirmed", &v)?;
		}
		if let Some(v) = self.stats.days_since_100_cases {
			map.serialize_entry("daysSince100Cases", &v)?;
		}
		if let Some(v) = self.stats.days_since_10_deaths {
			map.serialize_entry("daysSince10Deaths", &v)?;
		}
		if let Some(v) = self.stats.days_since_50_deaths {
			map.serialize_entry("daysSince50Deaths", &v)?;
		}
		map.end()
	}
}


fn blank_item(date: NaiveDate, name: SmartString, location_id: SmartString, level: AdminLevel, stats: UnitStats) -> OutputItem {
	OutputItem{
		date,
		name,
		location_id,
		admin_level: level,
		lat: None,
		long: None,
		iso3: None,
		country_name: None,
		country_iso3: None,
		state_name: None,
		state_iso3: None,
		cbsa: None,
		population: None,
		country_population: None,
		wb_region: None,
		num_subnational: None,
		gdp: None,
		sub_parts: None,
		testing: None,
		stats,
	}
}


fn emit_layer<K, KF, IF>(
	records: &[ResolvedRecord],
	layer: &'static str,
	key_fn: KF,
	item_fn: IF,
) -> Vec<OutputItem>
	where K: std::hash::Hash + Eq + Sync + Send,
		KF: Fn(&ResolvedRecord) -> Option<K> + Sync,
		IF: Fn(&K, &UnitSeries, NaiveDate, &ResolvedRecord, UnitStats) -> OutputItem + Sync + Send,
{
	let grouped: GroupedSeries<K> = GroupedSeries::build(records, key_fn);
	let units: Vec<(&K, &UnitSeries)> = grouped.units.iter().collect();
	let items: Vec<OutputItem> = units.into_par_iter()
		.flat_map(|(key, unit)| {
			unit.days.iter()
				.map(|(&date, group)| {
					let stats = unit_stats(unit, date);
					item_fn(key, unit, date, &records[group.exemplar], stats)
				})
				.collect::<Vec<_>>()
		})
		.collect();
	info!("generated {} {} items", items.len(), layer);
	items
}


/// Number of distinct subnational units reporting for each country on that
/// country's most recent date.
fn subnational_counts(records: &[ResolvedRecord]) -> HashMap<SmartString, u64> {
	let mut latest: HashMap<SmartString, NaiveDate> = HashMap::new();
	for rec in records.iter() {
		let entry = latest.entry(rec.country.code.clone()).or_insert(rec.record.date);
		if rec.record.date > *entry {
			*entry = rec.record.date;
		}
	}
	let mut states: HashMap<SmartString, HashSet<Option<SmartString>>> = HashMap::new();
	for rec in records.iter() {
		if latest.get(&rec.country.code) == Some(&rec.record.date) {
			states.entry(rec.country.code.clone())
				.or_default()
				.insert(rec.state.as_ref().map(|s| s.code.clone()));
		}
	}
	states.into_iter()
		.map(|(country, codes)| (country, codes.len() as u64))
		.collect()
}


fn region_items(records: &[ResolvedRecord]) -> Vec<OutputItem> {
	emit_layer(records, "region", |r| Some(r.region_wb.clone()), |key, _, date, _, stats| {
		let mut item = blank_item(date, key.clone(), format_id(key), AdminLevel::Region, stats);
		item.iso3 = Some(key.clone());
		item.wb_region = Some(key.clone());
		item
	})
}

fn country_items(records: &[ResolvedRecord]) -> Vec<OutputItem> {
	let subnational = subnational_counts(records);
	emit_layer(records, "country", |r| Some(r.country.code.clone()), |key, _, date, rec, stats| {
		let mut item = blank_item(date, rec.country.name.clone(), format_id(key), AdminLevel::Country, stats);
		item.country_name = Some(rec.country.name.clone());
		item.iso3 = Some(rec.country.code.clone());
		item.lat = rec.country.lat;
		item.long = rec.country.long;
		item.population = Some(rec.country_population);
		item.wb_region = Some(rec.region_wb.clone());
		item.num_subnational = subnational.get(key).copied();
		item.gdp = rec.gdp;
		item
	})
}

fn state_items(records: &[ResolvedRecord]) -> Vec<OutputItem> {
	emit_layer(
		records,
		"state",
		|r| r.state.as_ref().map(|s| s.code.clone()),
		|key, _, date, rec, stats| {
			let state = rec.state.as_ref().expect("grouped record lost its state");
			let mut base: SmartString = rec.country.code.clone();
			base.push('_');
			base.push_str(key);
			let mut item = blank_item(date, state.name.clone(), format_id(&base), AdminLevel::State, stats);
			item.country_name = Some(rec.country.name.clone());
			item.iso3 = Some(state.code.clone());
			item.country_iso3 = Some(rec.country.code.clone());
			item.lat = state.lat;
			item.long = state.long;
			item.country_population = Some(rec.country_population);
			item.wb_region = Some(rec.region_wb.clone());
			item.gdp = rec.gdp;
			item.testing = rec.testing.clone();
			item
		},
	)
}

fn county_items(records: &[ResolvedRecord]) -> Vec<OutputItem> {
	emit_layer(
		records,
		"county",
		|r| r.county.as_ref().map(|c| c.code.clone()),
		|key, _, date, rec, stats| {
			let county = rec.county.as_ref().expect("grouped record lost its county");
			let state = rec.state.as_ref().expect("grouped record lost its state");
			let mut base: SmartString = rec.country.code.clone();
			base.push('_');
			base.push_str(&state.code);
			base.push('_');
			base.push_str(key);
			let mut item = blank_item(date, county.name.clone(), format_id(&base), AdminLevel::County, stats);
			item.country_name = Some(rec.country.name.clone());
			item.iso3 = Some(county.code.clone());
			item.state_name = Some(state.name.clone());
			item.state_iso3 = Some(state.code.clone());
			item.country_iso3 = Some(rec.country.code.clone());
			item.lat = county.lat;
			item.long = county.long;
			item.country_population = Some(rec.country_population);
			item.wb_region = Some(rec.region_wb.clone());
			item.gdp = rec.gdp;
			item
		},
	)
}

fn metro_items(records: &[ResolvedRecord], crosswalk: &MetroCrosswalk) -> Vec<OutputItem> {
	emit_layer(
		records,
		"metro",
		|r| r.metro.as_ref().map(|m| m.code.clone()),
		|key, _, date, rec, stats| {
			let metro = rec.metro.as_ref().expect("grouped record lost its metro");
			let mut base: SmartString = "METRO_".into();
			base.push_str(key);
			let mut item = blank_item(date, metro.name.clone(), format_id(&base), AdminLevel::Metro, stats);
			item.cbsa = Some(metro.code.clone());
			item.lat = metro.lat;
			item.long = metro.long;
			item.country_name = Some(rec.country.name.clone());
			item.wb_region = Some(rec.region_wb.clone());
			item.sub_parts = Some(crosswalk.counties_of(key).to_vec());
			item
		},
	)
}

fn city_items(records: &[ResolvedRecord]) -> Vec<OutputItem> {
	emit_layer(
		records,
		"city",
		|r| r.city.as_ref().map(|c| c.code.clone()),
		|key, _, date, rec, stats| {
			let city = rec.city.as_ref().expect("grouped record lost its city");
			let mut base: SmartString = "CITY_".into();
			base.push_str(key);
			let mut item = blank_item(date, city.name.clone(), format_id(&base), AdminLevel::City, stats);
			// the city identifier doubles as its CBSA-style code
			item.cbsa = Some(city.code.clone());
			item.lat = city.lat;
			item.long = city.long;
			item.country_name = Some(rec.country.name.clone());
			item
		},
	)
}


/// Generates the full flat list of items, all layers included.
pub fn emit_all(records: &[ResolvedRecord], crosswalk: &MetroCrosswalk) -> Vec<OutputItem> {
	let mut items = country_items(records);
	items.extend(state_items(records));
	items.extend(county_items(records));
	items.extend(region_items(records));
	items.extend(city_items(records));
	items.extend(metro_items(records, crosswalk));
	info!("generated {} items in total", items.len());
	items
}
