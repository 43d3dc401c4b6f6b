use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};

use log::warn;

use serde_json::Value;

use smartstring::alias::String as SmartString;

use super::features::StateFeature;
use super::geometry::PolygonIndex;


pub const DEFAULT_TESTING_URL: &'static str = "https://covidtracking.com/api/states/daily";

/// Per-state testing figures keyed by `YYYY-MM-DD_US-XX`.
pub type TestingMap = HashMap<SmartString, serde_json::Map<String, Value>>;


/// The feed writes timestamps as `MM/DD HH:MM` or `MM/DD/YYYY HH:MM`;
/// both are normalized to `2020-MM-DD HH:MM`.
fn munge_timestamp(v: &str) -> Option<String> {
	let parsed = if v.split('/').count() == 2 {
		NaiveDateTime::parse_from_str(&format!("2020/{}", v), "%Y/%m/%d %H:%M")
	} else {
		NaiveDateTime::parse_from_str(v, "%m/%d/%Y %H:%M")
	};
	Some(parsed.ok()?.format("2020-%m-%d %H:%M").to_string())
}

fn row_date(row: &serde_json::Map<String, Value>) -> Option<NaiveDate> {
	// dates come as the integer 20200322, occasionally as a string
	let raw = match row.get("date")? {
		Value::Number(n) => n.as_i64()?.to_string(),
		Value::String(s) => s.clone(),
		_ => return None,
	};
	NaiveDate::parse_from_str(&raw, "%Y%m%d").ok()
}

fn munge_row(row: &serde_json::Map<String, Value>) -> serde_json::Map<String, Value> {
	let mut result = serde_json::Map::new();
	for (k, v) in row.iter() {
		if v.is_null() || k == "state" || k == "date" || k == "hash" {
			continue;
		}
		if k == "lastUpdateEt" || k == "checkTimeEt" {
			if let Value::String(s) = v {
				if s.contains('/') {
					if let Some(munged) = munge_timestamp(s) {
						result.insert(k.clone(), Value::String(munged));
						continue;
					}
				}
			}
		}
		result.insert(k.clone(), v.clone());
	}
	result
}

/// Indexes the raw feed rows by date and state code.
///
/// States without any row only get a warning; testing data is an optional
/// enrichment, never a reason to fail the run.
pub fn index_testing_rows(rows: &[Value], states: &PolygonIndex<StateFeature>) -> TestingMap {
	let mut by_abbr: HashMap<&str, Vec<&serde_json::Map<String, Value>>> = HashMap::new();
	for row in rows.iter() {
		let row = match row.as_object() {
			Some(o) => o,
			None => continue,
		};
		if let Some(Value::String(abbr)) = row.get("state") {
			by_abbr.entry(abbr).or_default().push(row);
		}
	}

	let mut result = TestingMap::new();
	for feat in states.features().iter() {
		if feat.country_iso3 != "USA" {
			continue;
		}
		let abbr = if feat.iso_3166_2.len() >= 2 {
			&feat.iso_3166_2[feat.iso_3166_2.len() - 2..]
		} else {
			continue
		};
		let state_rows = match by_abbr.get(abbr) {
			Some(rows) => rows,
			None => {
				warn!("no testing data for US state {}", feat.iso_3166_2);
				continue
			},
		};
		for row in state_rows.iter() {
			let date = match row_date(row) {
				Some(d) => d,
				None => continue,
			};
			let mut key: SmartString = date.format("%Y-%m-%d").to_string().into();
			key.push('_');
			key.push_str(&feat.iso_3166_2);
			result.insert(key, munge_row(row));
		}
	}
	result
}

/// Fetches the state testing feed and indexes it.
///
/// Any fetch or decode failure degrades to an empty map with a warning.
pub fn fetch_testing_data(url: &str, states: &PolygonIndex<StateFeature>) -> TestingMap {
	let rows: Vec<Value> = match fetch_rows(url) {
		Ok(rows) => rows,
		Err(e) => {
			warn!("testing data could not be obtained from {}: {}", url, e);
			return TestingMap::new()
		},
	};
	index_testing_rows(&rows[..], states)
}

fn fetch_rows(url: &str) -> Result<Vec<Value>, reqwest::Error> {
	let resp = reqwest::blocking::get(url)?.error_for_status()?;
	resp.json()
}
