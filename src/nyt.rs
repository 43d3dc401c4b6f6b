use std::collections::HashMap;
use std::fmt;
use std::io::Read;

use chrono::NaiveDate;

use log::warn;

use serde::Deserialize;

use smartstring::alias::String as SmartString;

use super::features::{CountyFeature, StateFeature};
use super::geometry::{centroid, PolygonIndex};
use super::report::{DailyRecord, Source};


/// State-level FIPS codes of US territories.
///
/// The boundary layer only carries FIPS codes for the 50 states and DC;
/// territories are identified by their own ISO3 code instead.
static TERRITORY_FIPS: &'static [(&'static str, &'static str)] = &[
	("VIR", "78"),
	("GUM", "66"),
	("MNP", "69"),
	("PRI", "72"),
	("ASM", "60"),
];

const NYC_LAT: f64 = 40.730610;
const NYC_LONG: f64 = 73.935242;
const KC_LAT: f64 = 39.09973;
const KC_LONG: f64 = -94.57857;


#[derive(Debug)]
pub enum ReconcileError {
	Csv(csv::Error),
	UnmappedStateFips(SmartString),
}

impl fmt::Display for ReconcileError {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Csv(e) => fmt::Display::fmt(e, f),
			Self::UnmappedStateFips(fips) => write!(f, "no state boundary for FIPS code {}", fips),
		}
	}
}

impl From<csv::Error> for ReconcileError {
	fn from(err: csv::Error) -> Self {
		Self::Csv(err)
	}
}

impl std::error::Error for ReconcileError {}


#[derive(Debug, Deserialize)]
struct CountyRow {
	date: NaiveDate,
	county: SmartString,
	state: SmartString,
	fips: Option<SmartString>,
	cases: u64,
	// early rows lack the deaths column
	deaths: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StateRow {
	date: NaiveDate,
	state: SmartString,
	fips: SmartString,
	cases: u64,
	deaths: Option<u64>,
}


/// US state and territory boundaries keyed by their bare state FIPS code.
pub fn us_states_by_fips<'x>(states: &'x PolygonIndex<StateFeature>) -> HashMap<SmartString, &'x StateFeature> {
	let mut result: HashMap<SmartString, &'x StateFeature> = HashMap::new();
	for feat in states.features().iter() {
		if feat.country_iso3 == "USA" {
			if let Some(fips) = feat.state_fips() {
				result.insert(fips.into(), feat);
			}
			continue;
		}
		for (iso3, fips) in TERRITORY_FIPS.iter() {
			if feat.country_iso3 == *iso3 {
				result.insert((*fips).into(), feat);
			}
		}
	}
	result
}


fn reconciled_record(date: NaiveDate, state: SmartString, confirmed: u64, deaths: u64) -> DailyRecord {
	DailyRecord{
		date,
		country_region: "US".into(),
		province_state: Some(state),
		admin2: None,
		fips: None,
		lat: None,
		long: None,
		confirmed,
		deaths,
		recovered: 0,
		source: Source::Reconciled,
	}
}

/// Builds canonical records from the secondary US source.
///
/// County rows become county records with the county polygon centroid as
/// their coordinate. New York City and Kansas City report without a FIPS
/// code and keep their well-known city coordinates. Any state count in
/// excess of the county sum for that day becomes an `Unassigned` residual
/// record at the state centroid; negative residuals are clamped to zero and
/// rows left with neither cases nor deaths are dropped.
pub fn reconcile<A: Read, B: Read>(
	county_csv: A,
	state_csv: B,
	states: &PolygonIndex<StateFeature>,
	counties: &PolygonIndex<CountyFeature>,
) -> Result<Vec<DailyRecord>, ReconcileError> {
	let state_by_fips = us_states_by_fips(states);
	let mut result = Vec::new();
	let mut county_sums: HashMap<(SmartString, NaiveDate), (u64, u64)> = HashMap::new();

	let mut reader = csv::Reader::from_reader(county_csv);
	for row in reader.deserialize() {
		let row: CountyRow = row?;
		let deaths = row.deaths.unwrap_or(0);
		let mut rec = reconciled_record(row.date, row.state.clone(), row.cases, deaths);
		rec.admin2 = Some(row.county.clone());
		match &row.fips {
			Some(fips) => {
				rec.fips = Some(fips.clone());
				match counties.get(fips).and_then(|feat| centroid(&feat.geometry)) {
					Some((long, lat)) => {
						rec.lat = Some(lat);
						rec.long = Some(long);
					},
					None => warn!("no county boundary for FIPS code {}", fips),
				}
			},
			None => {
				// only the two special-case cities report without a FIPS
				// code; everything else without one is unusable
				if row.county == "New York City" && row.state == "New York" {
					rec.lat = Some(NYC_LAT);
					rec.long = Some(NYC_LONG);
				} else if row.county == "Kansas City" && row.state == "Missouri" {
					rec.lat = Some(KC_LAT);
					rec.long = Some(KC_LONG);
				} else {
					continue;
				}
			},
		}
		let sums = county_sums.entry((row.state, row.date)).or_insert((0, 0));
		sums.0 += row.cases;
		sums.1 += deaths;
		result.push(rec);
	}

	let mut reader = csv::Reader::from_reader(state_csv);
	for row in reader.deserialize() {
		let row: StateRow = row?;
		let feat = match state_by_fips.get(&row.fips) {
			Some(feat) => *feat,
			None => return Err(ReconcileError::UnmappedStateFips(row.fips)),
		};
		let deaths = row.deaths.unwrap_or(0);
		let (confirmed, deaths) = match county_sums.get(&(row.state.clone(), row.date)) {
			Some(&(county_cases, county_deaths)) => (
				row.cases.saturating_sub(county_cases),
				deaths.saturating_sub(county_deaths),
			),
			None => (row.cases, deaths),
		};
		if confirmed == 0 && deaths == 0 {
			continue;
		}
		let mut rec = reconciled_record(row.date, row.state, confirmed, deaths);
		rec.admin2 = Some("Unassigned".into());
		rec.fips = Some(row.fips);
		if let Some((long, lat)) = centroid(&feat.geometry) {
			rec.lat = Some(lat);
			rec.long = Some(long);
		}
		result.push(rec);
	}

	Ok(result)
}


/// Replaces the US portion of the snapshot records with the reconciled
/// records, keeping only cruise-ship rows from the original US data.
pub fn merge(records: &mut Vec<DailyRecord>, reconciled: Vec<DailyRecord>) {
	records.retain(|rec| rec.country_region != "US" || rec.is_cruise());
	records.extend(reconciled);
}


#[cfg(test)]
mod tests {
	use super::*;

	use geo::{Coord, LineString, MultiPolygon, Polygon};

	use super::super::report::{CRUISE_LAT, CRUISE_LONG};

	fn square(x0: f64, y0: f64, side: f64) -> MultiPolygon<f64> {
		MultiPolygon(vec![Polygon::new(
			LineString(vec![
				Coord{x: x0, y: y0},
				Coord{x: x0 + side, y: y0},
				Coord{x: x0 + side, y: y0 + side},
				Coord{x: x0, y: y0 + side},
				Coord{x: x0, y: y0},
			]),
			vec![],
		)])
	}

	fn state_index() -> PolygonIndex<StateFeature> {
		PolygonIndex::build("states", vec![
			StateFeature{
				iso_3166_2: "US-WA".into(),
				name: "Washington".into(),
				country_iso3: "USA".into(),
				fips: Some("US53".into()),
				geometry: square(-124.0, 45.5, 2.0),
			},
			StateFeature{
				iso_3166_2: "PR-X01".into(),
				name: "Arecibo".into(),
				country_iso3: "PRI".into(),
				fips: None,
				geometry: square(-67.0, 18.0, 0.5),
			},
		]).unwrap()
	}

	fn county_index() -> PolygonIndex<CountyFeature> {
		PolygonIndex::build("counties", vec![
			CountyFeature{
				fips: "53033".into(),
				state_fips: "53".into(),
				name: "King County".into(),
				geometry: square(-122.5, 47.0, 1.0),
			},
		]).unwrap()
	}

	#[test]
	fn territories_map_by_iso3() {
		let states = state_index();
		let by_fips = us_states_by_fips(&states);
		assert_eq!(by_fips.get("53").unwrap().name, "Washington");
		assert_eq!(by_fips.get("72").unwrap().name, "Arecibo");
		assert!(by_fips.get("66").is_none());
	}

	#[test]
	fn county_rows_get_the_county_centroid() {
		let county_csv = "date,county,state,fips,cases,deaths\n\
			2020-03-01,King,Washington,53033,10,1\n";
		let state_csv = "date,state,fips,cases,deaths\n";
		let recs = reconcile(
			county_csv.as_bytes(), state_csv.as_bytes(),
			&state_index(), &county_index(),
		).unwrap();
		assert_eq!(recs.len(), 1);
		assert_eq!(recs[0].source, Source::Reconciled);
		assert_eq!(recs[0].fips.as_deref(), Some("53033"));
		assert_eq!(recs[0].lat, Some(47.5));
		assert_eq!(recs[0].long, Some(-122.0));
	}

	#[test]
	fn city_rows_without_fips_keep_fixed_coordinates() {
		let county_csv = "date,county,state,fips,cases,deaths\n\
			2020-03-20,New York City,New York,,200,10\n\
			2020-03-20,Kansas City,Missouri,,30,1\n\
			2020-03-20,Unknown,Washington,,5,0\n";
		let state_csv = "date,state,fips,cases,deaths\n";
		let recs = reconcile(
			county_csv.as_bytes(), state_csv.as_bytes(),
			&state_index(), &county_index(),
		).unwrap();
		assert_eq!(recs.len(), 2);
		assert_eq!(recs[0].admin2.as_deref(), Some("New York City"));
		assert_eq!(recs[0].lat, Some(NYC_LAT));
		assert_eq!(recs[1].long, Some(KC_LONG));
	}

	#[test]
	fn state_residual_is_clamped_and_unassigned() {
		let county_csv = "date,county,state,fips,cases,deaths\n\
			2020-03-01,King,Washington,53033,10,3\n";
		let state_csv = "date,state,fips,cases,deaths\n\
			2020-03-01,Washington,53,14,2\n";
		let recs = reconcile(
			county_csv.as_bytes(), state_csv.as_bytes(),
			&state_index(), &county_index(),
		).unwrap();
		assert_eq!(recs.len(), 2);
		let residual = &recs[1];
		assert_eq!(residual.admin2.as_deref(), Some("Unassigned"));
		assert_eq!(residual.confirmed, 4);
		// county deaths exceed the state total; the residual clamps to zero
		assert_eq!(residual.deaths, 0);
		assert_eq!(residual.lat, Some(46.5));
	}

	#[test]
	fn all_zero_residuals_are_dropped() {
		let county_csv = "date,county,state,fips,cases,deaths\n\
			2020-03-01,King,Washington,53033,14,2\n";
		let state_csv = "date,state,fips,cases,deaths\n\
			2020-03-01,Washington,53,14,2\n";
		let recs = reconcile(
			county_csv.as_bytes(), state_csv.as_bytes(),
			&state_index(), &county_index(),
		).unwrap();
		assert_eq!(recs.len(), 1);
	}

	#[test]
	fn unmapped_state_fips_is_fatal() {
		let county_csv = "date,county,state,fips,cases,deaths\n";
		let state_csv = "date,state,fips,cases,deaths\n\
			2020-03-01,Guam,66,4,0\n";
		let result = reconcile(
			county_csv.as_bytes(), state_csv.as_bytes(),
			&state_index(), &county_index(),
		);
		assert!(matches!(result, Err(ReconcileError::UnmappedStateFips(_))));
	}

	#[test]
	fn merge_keeps_only_cruise_rows_from_us_data() {
		let mut records = vec![
			DailyRecord{
				date: NaiveDate::from_ymd(2020, 3, 1),
				country_region: "US".into(),
				province_state: Some("Washington".into()),
				admin2: None,
				fips: None,
				lat: Some(47.5),
				long: Some(-122.0),
				confirmed: 10,
				deaths: 0,
				recovered: 0,
				source: Source::DailySnapshot,
			},
			DailyRecord{
				date: NaiveDate::from_ymd(2020, 3, 1),
				country_region: "US".into(),
				province_state: Some("Diamond Princess".into()),
				admin2: None,
				fips: None,
				lat: Some(CRUISE_LAT),
				long: Some(CRUISE_LONG),
				confirmed: 40,
				deaths: 0,
				recovered: 0,
				source: Source::DailySnapshot,
			},
			DailyRecord{
				date: NaiveDate::from_ymd(2020, 3, 1),
				country_region: "France".into(),
				province_state: None,
				admin2: None,
				fips: None,
				lat: Some(46.2),
				long: Some(2.2),
				confirmed: 5,
				deaths: 0,
				recovered: 0,
				source: Source::DailySnapshot,
			},
		];
		merge(&mut records, vec![reconciled_record(
			NaiveDate::from_ymd(2020, 3, 1), "Washington".into(), 12, 0,
		)]);
		assert_eq!(records.len(), 3);
		assert!(records[0].is_cruise());
		assert_eq!(records[1].country_region, "France");
		assert_eq!(records[2].source, Source::Reconciled);
	}
}
