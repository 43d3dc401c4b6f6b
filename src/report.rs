use std::collections::HashMap;
use std::fmt;
use std::io;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;

use log::{info, warn};

use smartstring::alias::String as SmartString;

use super::features::CountryFeature;
use super::geometry::{centroid, Coordinate, PolygonIndex};


/// Sentinel coordinate for cruise-ship records.
///
/// Deliberately outside the valid range so no polygon can ever match it;
/// downstream stages detect it and run the cruise special case instead of
/// silently resolving the ship to a nearby country.
pub const CRUISE_LAT: f64 = 91.0;
pub const CRUISE_LONG: f64 = 181.0;

static CRUISE_MARKERS: &'static [&'static str] = &["diamond princess", "grand princess", "cruise", "ship"];

/// Countries whose published coordinates are historically wrong; their
/// centroid is always recomputed from the country polygon.
static WRONG_LATLONG_COUNTRIES: &'static [&'static str] = &["Belize", "Malaysia"];


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
	DailySnapshot,
	Reconciled,
}


/// One canonical row of case data, from either source.
#[derive(Debug, Clone)]
pub struct DailyRecord {
	pub date: NaiveDate,
	pub country_region: SmartString,
	pub province_state: Option<SmartString>,
	pub admin2: Option<SmartString>,
	pub fips: Option<SmartString>,
	pub lat: Option<f64>,
	pub long: Option<f64>,
	pub confirmed: u64,
	pub deaths: u64,
	pub recovered: u64,
	pub source: Source,
}

impl DailyRecord {
	pub fn coordinate(&self) -> Option<Coordinate> {
		match (self.lat, self.long) {
			(Some(lat), Some(long)) => Some(Coordinate::new(lat, long)),
			_ => None,
		}
	}

	pub fn is_cruise(&self) -> bool {
		self.lat == Some(CRUISE_LAT) && self.long == Some(CRUISE_LONG)
	}

	/// A record carrying no counts at all is not a fact.
	pub fn is_informative(&self) -> bool {
		self.confirmed + self.deaths + self.recovered != 0
	}
}


#[derive(Debug)]
pub enum ReportError {
	Io(io::Error),
	Csv(csv::Error),
	BadFilename(String),
	MissingColumn(&'static str),
}

impl fmt::Display for ReportError {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Io(e) => fmt::Display::fmt(e, f),
			Self::Csv(e) => fmt::Display::fmt(e, f),
			Self::BadFilename(name) => write!(f, "cannot derive report date from filename {:?}", name),
			Self::MissingColumn(name) => write!(f, "daily report lacks required column {}", name),
		}
	}
}

impl From<io::Error> for ReportError {
	fn from(err: io::Error) -> Self {
		Self::Io(err)
	}
}

impl From<csv::Error> for ReportError {
	fn from(err: csv::Error) -> Self {
		Self::Csv(err)
	}
}

impl std::error::Error for ReportError {}


/// Early snapshots have no date column; the date is encoded in the filename
/// as `MM-DD-YYYY.csv` (optionally gzipped).
pub fn report_date_from_filename<P: AsRef<Path>>(path: P) -> Result<NaiveDate, ReportError> {
	let path = path.as_ref();
	let stem = match path.file_name().and_then(|n| n.to_str()) {
		Some(name) => name.trim_end_matches(".gz").trim_end_matches(".csv"),
		None => return Err(ReportError::BadFilename(format!("{:?}", path))),
	};
	NaiveDate::parse_from_str(stem, "%m-%d-%Y")
		.map_err(|_| ReportError::BadFilename(stem.to_string()))
}


/// Column positions after header harmonization.
///
/// Snapshot schemas changed over time (`Province/State` vs `Province_State`,
/// `Long_` vs `Longitude`); header names are normalized before lookup so one
/// reader handles every vintage.
struct Columns {
	country: usize,
	province: Option<usize>,
	admin2: Option<usize>,
	fips: Option<usize>,
	lat: Option<usize>,
	long: Option<usize>,
	confirmed: Option<usize>,
	deaths: Option<usize>,
	recovered: Option<usize>,
}

fn normalize_header(name: &str) -> SmartString {
	let name = name.trim().replace('/', "_").replace(' ', "_");
	match name.as_str() {
		"Latitude" => "Lat".into(),
		"Long_" | "Longitude" => "Long".into(),
		_ => name.into(),
	}
}

impl Columns {
	fn from_headers(headers: &csv::StringRecord) -> Result<Self, ReportError> {
		let mut by_name: HashMap<SmartString, usize> = HashMap::new();
		for (i, name) in headers.iter().enumerate() {
			by_name.insert(normalize_header(name), i);
		}
		let lookup = |name: &str| by_name.get(name).copied();
		Ok(Self{
			country: lookup("Country_Region").ok_or(ReportError::MissingColumn("Country_Region"))?,
			province: lookup("Province_State"),
			admin2: lookup("Admin2"),
			fips: lookup("FIPS"),
			lat: lookup("Lat"),
			long: lookup("Long"),
			confirmed: lookup("Confirmed"),
			deaths: lookup("Deaths"),
			recovered: lookup("Recovered"),
		})
	}
}

fn field_opt(row: &csv::StringRecord, index: Option<usize>) -> Option<SmartString> {
	let s = row.get(index?)?.trim();
	if s.is_empty() {
		return None
	}
	Some(s.into())
}

fn count_field(row: &csv::StringRecord, index: Option<usize>) -> u64 {
	// counts are occasionally written as floats and may be absent entirely
	// in early schemas
	let s = match index.and_then(|i| row.get(i)) {
		Some(s) => s.trim(),
		None => return 0,
	};
	match s.parse::<f64>() {
		Ok(v) if v > 0.0 => v.round() as u64,
		_ => 0,
	}
}

fn coord_field(row: &csv::StringRecord, index: Option<usize>) -> Option<f64> {
	let s = index.and_then(|i| row.get(i))?.trim();
	match s.parse::<f64>() {
		// exactly zero means "unset" in the source data, not a real location
		Ok(v) if v != 0.0 => Some(v),
		_ => None,
	}
}

fn has_cruise_marker(value: &str) -> bool {
	let value = value.to_lowercase();
	CRUISE_MARKERS.iter().any(|marker| value.contains(marker))
}


/// Reads one daily snapshot into canonical records.
///
/// Harmonizes columns, trims strings, nulls unset coordinates, drops rows
/// with no counts and forces the cruise sentinel coordinate.
pub fn read_daily_report<R: Read>(r: R, date: NaiveDate) -> Result<Vec<DailyRecord>, ReportError> {
	let mut reader = csv::Reader::from_reader(r);
	let columns = Columns::from_headers(reader.headers()?)?;
	let mut result = Vec::new();
	for row in reader.records() {
		let row = row?;
		let mut rec = DailyRecord{
			date,
			country_region: field_opt(&row, Some(columns.country)).unwrap_or_default(),
			province_state: field_opt(&row, columns.province),
			admin2: field_opt(&row, columns.admin2),
			fips: field_opt(&row, columns.fips),
			lat: coord_field(&row, columns.lat),
			long: coord_field(&row, columns.long),
			confirmed: count_field(&row, columns.confirmed),
			deaths: count_field(&row, columns.deaths),
			recovered: count_field(&row, columns.recovered),
			source: Source::DailySnapshot,
		};
		if !rec.is_informative() {
			continue;
		}
		let cruise = has_cruise_marker(&rec.country_region)
			|| rec.province_state.as_deref().map(has_cruise_marker).unwrap_or(false);
		if cruise {
			rec.lat = Some(CRUISE_LAT);
			rec.long = Some(CRUISE_LONG);
		}
		result.push(rec);
	}
	Ok(result)
}


/// Overwrites the coordinates of countries with known-bad published
/// centroids with the true country-polygon centroid.
pub fn fix_wrong_centroids(records: &mut [DailyRecord], countries: &PolygonIndex<CountryFeature>) {
	for name in WRONG_LATLONG_COUNTRIES.iter() {
		let feat = countries.features().iter().find(|f| f.name == *name);
		let feat = match feat {
			Some(f) => f,
			None => {
				warn!("no country polygon named {}, cannot fix its centroid", name);
				continue
			},
		};
		let (long, lat) = match centroid(&feat.geometry) {
			Some(c) => c,
			None => continue,
		};
		for rec in records.iter_mut() {
			if rec.country_region == *name {
				if rec.province_state.is_some() || rec.admin2.is_some() {
					warn!("{} has admin1/2 rows; verify the country centroid is still the right fix", name);
				}
				rec.lat = Some(lat);
				rec.long = Some(long);
			}
		}
	}
}


fn mean_by_key<K, KF, DF>(records: &[DailyRecord], key_fn: KF, donor_fn: DF) -> HashMap<K, (f64, f64)>
	where K: std::hash::Hash + Eq,
		KF: Fn(&DailyRecord) -> Option<K>,
		DF: Fn(&DailyRecord) -> bool,
{
	let mut sums: HashMap<K, (f64, f64, u64)> = HashMap::new();
	for rec in records.iter() {
		if !donor_fn(rec) {
			continue;
		}
		let (lat, long) = match (rec.lat, rec.long) {
			(Some(lat), Some(long)) => (lat, long),
			_ => continue,
		};
		let key = match key_fn(rec) {
			Some(k) => k,
			None => continue,
		};
		let entry = sums.entry(key).or_insert((0.0, 0.0, 0));
		entry.0 += lat;
		entry.1 += long;
		entry.2 += 1;
	}
	sums.into_iter()
		.map(|(k, (lat, long, n))| (k, (lat / n as f64, long / n as f64)))
		.collect()
}

fn fill_from_mean<K, KF, DF>(records: &mut [DailyRecord], key_fn: KF, donor_fn: DF)
	where K: std::hash::Hash + Eq,
		KF: Fn(&DailyRecord) -> Option<K>,
		DF: Fn(&DailyRecord) -> bool,
{
	let means = mean_by_key(&records[..], &key_fn, donor_fn);
	for rec in records.iter_mut() {
		if rec.lat.is_some() && rec.long.is_some() {
			continue;
		}
		let key = match key_fn(rec) {
			Some(k) => k,
			None => continue,
		};
		match means.get(&key) {
			Some(&(lat, long)) => {
				rec.lat = Some(lat);
				rec.long = Some(long);
			},
			None => info!("no known coordinate to backfill {:?}/{:?}", rec.country_region, rec.province_state),
		}
	}
}

fn unify_to_mode<K, KF>(records: &mut [DailyRecord], key_fn: KF)
	where K: std::hash::Hash + Eq + Clone,
		KF: Fn(&DailyRecord) -> Option<K>,
{
	// most frequent coordinate per group; ties resolved by first appearance
	let mut counts: HashMap<K, HashMap<Coordinate, (usize, usize)>> = HashMap::new();
	for (i, rec) in records.iter().enumerate() {
		let key = match key_fn(rec) {
			Some(k) => k,
			None => continue,
		};
		let coord = match rec.coordinate() {
			Some(c) => c,
			None => continue,
		};
		let entry = counts.entry(key).or_default();
		let slot = entry.entry(coord).or_insert((0, i));
		slot.0 += 1;
	}
	let modes: HashMap<K, Coordinate> = counts.into_iter()
		.filter_map(|(k, by_coord)| {
			let best = by_coord.into_iter()
				.max_by(|(_, (n_a, first_a)), (_, (n_b, first_b))| {
					n_a.cmp(n_b).then(first_b.cmp(first_a))
				})?;
			Some((k, best.0))
		})
		.collect();
	for rec in records.iter_mut() {
		let key = match key_fn(rec) {
			Some(k) => k,
			None => continue,
		};
		if let Some(coord) = modes.get(&key) {
			rec.lat = Some(coord.lat);
			rec.long = Some(coord.long);
		}
	}
}

fn round6(v: f64) -> f64 {
	(v * 1e6).round() / 1e6
}

/// Backfills missing coordinates from records of the same place and unifies
/// each place onto its most frequent coordinate.
///
/// Snapshot vintages disagree on where some places are (French Polynesia is
/// the classic case); statistics grouping needs one coordinate per place.
/// Records left without any coordinate are dropped with an accounting
/// warning.
pub fn backfill_coordinates(records: &mut Vec<DailyRecord>) {
	// fill from same-province donors first, then same-county, then
	// country-level donors
	fill_from_mean(records, |r| r.province_state.clone(), |r| r.admin2.is_none());
	fill_from_mean(records, |r| r.admin2.clone(), |_| true);
	fill_from_mean(
		records,
		|r| Some(r.country_region.clone()),
		|r| r.province_state.is_none() && r.admin2.is_none(),
	);

	let unknown: u64 = records.iter()
		.filter(|r| r.coordinate().is_none())
		.map(|r| r.confirmed)
		.sum();
	let before = records.len();
	records.retain(|r| r.coordinate().is_some());
	if records.len() != before {
		warn!(
			"dropped {} records with no resolvable coordinate ({} confirmed cases unaccounted)",
			before - records.len(), unknown,
		);
	}

	unify_to_mode(records, |r| {
		if r.province_state.is_none() && r.admin2.is_none() {
			Some(r.country_region.clone())
		} else {
			None
		}
	});
	unify_to_mode(records, |r| {
		match (&r.province_state, &r.admin2) {
			(Some(province), None) => Some((r.country_region.clone(), province.clone())),
			_ => None,
		}
	});
	unify_to_mode(records, |r| {
		match (&r.province_state, &r.admin2) {
			(Some(province), Some(admin2)) => {
				Some((r.country_region.clone(), province.clone(), admin2.clone()))
			},
			_ => None,
		}
	});

	for rec in records.iter_mut() {
		rec.lat = rec.lat.map(round6);
		rec.long = rec.long.map(round6);
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	fn record(country: &str, province: Option<&str>, confirmed: u64) -> DailyRecord {
		DailyRecord{
			date: NaiveDate::from_ymd(2020, 3, 1),
			country_region: country.into(),
			province_state: province.map(|p| p.into()),
			admin2: None,
			fips: None,
			lat: None,
			long: None,
			confirmed,
			deaths: 0,
			recovered: 0,
			source: Source::DailySnapshot,
		}
	}

	#[test]
	fn date_comes_from_filename() {
		let date = report_date_from_filename("reports/03-22-2020.csv").unwrap();
		assert_eq!(date, NaiveDate::from_ymd(2020, 3, 22));
		let date = report_date_from_filename("reports/01-05-2021.csv.gz").unwrap();
		assert_eq!(date, NaiveDate::from_ymd(2021, 1, 5));
		assert!(report_date_from_filename("reports/notes.csv").is_err());
	}

	#[test]
	fn legacy_and_current_headers_read_the_same() {
		let legacy = "Province/State,Country/Region,Last Update,Confirmed,Deaths,Recovered,Lat,Long_\n\
			Hubei,Mainland China,2020-02-01,100,2,5,30.97,112.27\n";
		let current = "FIPS,Admin2,Province_State,Country_Region,Confirmed,Deaths,Recovered,Latitude,Longitude\n\
			,,Hubei,Mainland China,100,2,5,30.97,112.27\n";
		let date = NaiveDate::from_ymd(2020, 2, 1);
		let a = read_daily_report(legacy.as_bytes(), date).unwrap();
		let b = read_daily_report(current.as_bytes(), date).unwrap();
		assert_eq!(a.len(), 1);
		assert_eq!(b.len(), 1);
		assert_eq!(a[0].country_region, b[0].country_region);
		assert_eq!(a[0].province_state, b[0].province_state);
		assert_eq!(a[0].confirmed, 100);
		assert_eq!(b[0].lat, Some(30.97));
	}

	#[test]
	fn zero_coordinates_are_unset() {
		let data = "Province_State,Country_Region,Confirmed,Deaths,Recovered,Lat,Long_\n\
			,Nowhere,3,0,0,0,0\n";
		let recs = read_daily_report(data.as_bytes(), NaiveDate::from_ymd(2020, 3, 1)).unwrap();
		assert_eq!(recs[0].lat, None);
		assert_eq!(recs[0].long, None);
	}

	#[test]
	fn zero_count_rows_are_dropped() {
		let data = "Province_State,Country_Region,Confirmed,Deaths,Recovered,Lat,Long_\n\
			,Nowhere,0,0,0,1.0,2.0\n\
			,Somewhere,1,0,0,1.0,2.0\n";
		let recs = read_daily_report(data.as_bytes(), NaiveDate::from_ymd(2020, 3, 1)).unwrap();
		assert_eq!(recs.len(), 1);
		assert_eq!(recs[0].country_region, "Somewhere");
	}

	#[test]
	fn cruise_rows_get_the_sentinel_coordinate() {
		let data = "Province_State,Country_Region,Confirmed,Deaths,Recovered,Lat,Long_\n\
			Diamond Princess,US,10,0,0,35.44,139.64\n\
			From Diamond Princess,Israel,2,0,0,31.0,35.0\n\
			Hubei,Mainland China,100,2,5,30.97,112.27\n";
		let recs = read_daily_report(data.as_bytes(), NaiveDate::from_ymd(2020, 3, 1)).unwrap();
		assert!(recs[0].is_cruise());
		assert!(recs[1].is_cruise());
		assert!(!recs[2].is_cruise());
		assert_eq!(recs[0].lat, Some(CRUISE_LAT));
		assert_eq!(recs[0].long, Some(CRUISE_LONG));
	}

	#[test]
	fn backfill_fills_missing_and_unifies_to_mode() {
		let mut records = vec![
			record("Oceania", None, 5),
			record("Oceania", None, 7),
			record("Oceania", None, 9),
			record("Oceania", None, 11),
		];
		records[0].lat = Some(-17.5);
		records[0].long = Some(-149.5);
		records[1].lat = Some(-17.5);
		records[1].long = Some(-149.5);
		records[2].lat = Some(-18.0);
		records[2].long = Some(-150.0);
		// records[3] has no coordinate at all
		backfill_coordinates(&mut records);
		assert_eq!(records.len(), 4);
		for rec in records.iter() {
			assert_eq!(rec.lat, Some(-17.5));
			assert_eq!(rec.long, Some(-149.5));
		}
	}

	#[test]
	fn backfill_drops_unresolvable_records() {
		let mut records = vec![record("Nowhere", Some("Ghost Province"), 3)];
		backfill_coordinates(&mut records);
		assert!(records.is_empty());
	}
}
