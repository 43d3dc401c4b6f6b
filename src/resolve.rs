use std::collections::{HashMap, HashSet};
use std::fmt;

use log::{info, warn};

use rayon::prelude::*;

use smartstring::alias::String as SmartString;

use super::crossref::{GdpTable, MetroCrosswalk};
use super::features::{CountryFeature, CountyFeature, MetroFeature, StateFeature};
use super::geometry::{centroid, Coordinate, GeoError, PolygonIndex};
use super::nyt::us_states_by_fips;
use super::report::{DailyRecord, Source, CRUISE_LAT, CRUISE_LONG};
use super::testing::TestingMap;


const NYC_NAME: &'static str = "New York City";
const NYC_CODE: &'static str = "US-NY_NYC";
const NYC_METRO_CBSA: &'static str = "35620";
const NYC_STATE: &'static str = "US-NY";
const KC_NAME: &'static str = "Kansas City";
const KC_CODE: &'static str = "US-MO_KC";
const KC_METRO_CBSA: &'static str = "28140";
const KC_STATE: &'static str = "US-MO";

const CRUISE_REGION: &'static str = "Cruises";
const DIAMOND_PRINCESS_CAPACITY: u64 = 3700;
const GRAND_PRINCESS_CAPACITY: u64 = 3533;


#[derive(Debug)]
pub enum ResolveError {
	Geo(GeoError),
	MissingHomeCountry,
	MissingHomeState(&'static str),
	UnmappedStateFips(SmartString),
	MissingCoordinate(SmartString),
}

impl fmt::Display for ResolveError {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Geo(e) => fmt::Display::fmt(e, f),
			Self::MissingHomeCountry => f.write_str("country layer lacks the USA boundary"),
			Self::MissingHomeState(code) => write!(f, "state layer lacks the {} boundary", code),
			Self::UnmappedStateFips(fips) => write!(f, "no state boundary for FIPS code {}", fips),
			Self::MissingCoordinate(place) => write!(f, "record for {} reached resolution without a coordinate", place),
		}
	}
}

impl From<GeoError> for ResolveError {
	fn from(err: GeoError) -> Self {
		Self::Geo(err)
	}
}

impl std::error::Error for ResolveError {}


/// All reference layers and tables needed to place a record.
pub struct GeoContext<'x> {
	pub countries: &'x PolygonIndex<CountryFeature>,
	pub states: &'x PolygonIndex<StateFeature>,
	pub counties: &'x PolygonIndex<CountyFeature>,
	pub metros: &'x PolygonIndex<MetroFeature>,
	pub crosswalk: &'x MetroCrosswalk,
	pub gdp: &'x GdpTable,
	pub testing: &'x TestingMap,
}


/// Name, identifier and representative point of one administrative unit.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceIdentity {
	pub name: SmartString,
	pub code: SmartString,
	pub lat: Option<f64>,
	pub long: Option<f64>,
}

fn place(name: &str, code: &str, geometry: &geo::MultiPolygon<f64>) -> PlaceIdentity {
	let (lat, long) = match centroid(geometry) {
		Some((long, lat)) => (Some(lat), Some(long)),
		None => (None, None),
	};
	PlaceIdentity{name: name.into(), code: code.into(), lat, long}
}


/// A record annotated with its position in the administrative hierarchy.
#[derive(Debug, Clone)]
pub struct ResolvedRecord {
	pub record: DailyRecord,
	pub region_wb: SmartString,
	pub country: PlaceIdentity,
	pub country_population: u64,
	pub state: Option<PlaceIdentity>,
	pub county: Option<PlaceIdentity>,
	pub metro: Option<PlaceIdentity>,
	pub city: Option<PlaceIdentity>,
	pub gdp: Option<(u16, f64)>,
	pub testing: Option<serde_json::Map<String, serde_json::Value>>,
}


/// Ship name from the free-form country and province fields.
///
/// Looks for a `<word> princess` phrase; records that only say "cruise
/// ship" default to the Diamond Princess, which is how they were reported.
fn cruise_ship_name(country: &str, province: Option<&str>) -> SmartString {
	let mut hay = country.to_lowercase();
	hay.push(' ');
	if let Some(p) = province {
		hay.push_str(&p.to_lowercase());
	}
	if let Some(pos) = hay.find(" princess") {
		let head = &hay[..pos];
		let start = head.rfind(|c: char| !c.is_ascii_alphabetic())
			.map(|i| i + 1)
			.unwrap_or(0);
		if start < pos {
			let mut name = String::new();
			let mut chars = head[start..].chars();
			if let Some(first) = chars.next() {
				name.push(first.to_ascii_uppercase());
			}
			name.extend(chars);
			name.push_str(" Princess");
			return name.into()
		}
	}
	"Diamond Princess".into()
}

fn cruise_capacity(ship: &str) -> u64 {
	if ship == "Grand Princess" {
		return GRAND_PRINCESS_CAPACITY
	}
	DIAMOND_PRINCESS_CAPACITY
}

fn resolve_cruise(record: DailyRecord) -> ResolvedRecord {
	let ship = cruise_ship_name(&record.country_region, record.province_state.as_deref());
	let code: SmartString = ship.to_lowercase().replace(' ', "_").into();
	ResolvedRecord{
		country: PlaceIdentity{
			name: CRUISE_REGION.into(),
			code: CRUISE_REGION.to_lowercase().into(),
			lat: Some(CRUISE_LAT),
			long: Some(CRUISE_LONG),
		},
		country_population: cruise_capacity(&ship),
		region_wb: CRUISE_REGION.into(),
		state: Some(PlaceIdentity{
			name: ship,
			code,
			lat: Some(CRUISE_LAT),
			long: Some(CRUISE_LONG),
		}),
		county: None,
		metro: None,
		city: None,
		gdp: None,
		testing: None,
		record,
	}
}


fn is_special_city(admin2: Option<&str>) -> bool {
	matches!(admin2, Some(NYC_NAME) | Some(KC_NAME))
}

struct HomeContext<'x> {
	country: &'x CountryFeature,
	state_by_fips: HashMap<SmartString, &'x StateFeature>,
}

fn resolve_reconciled<'x>(
	record: DailyRecord,
	ctx: &GeoContext<'x>,
	home: &HomeContext<'x>,
) -> Result<ResolvedRecord, ResolveError> {
	let city_coords = (record.lat, record.long);
	let record_date = record.date;
	let admin2 = record.admin2.clone();
	let fips = record.fips.clone();

	let country = place(&home.country.name, &home.country.iso3, &home.country.geometry);
	let mut resolved = ResolvedRecord{
		country,
		country_population: home.country.population,
		region_wb: home.country.region_wb.clone(),
		state: None,
		county: None,
		metro: None,
		city: None,
		gdp: ctx.gdp.get(&home.country.iso3),
		testing: None,
		record,
	};

	let admin2 = admin2.as_deref();
	if is_special_city(admin2) {
		let (city_name, city_code, cbsa, state_code) = if admin2 == Some(NYC_NAME) {
			(NYC_NAME, NYC_CODE, NYC_METRO_CBSA, NYC_STATE)
		} else {
			(KC_NAME, KC_CODE, KC_METRO_CBSA, KC_STATE)
		};
		resolved.city = Some(PlaceIdentity{
			name: city_name.into(),
			code: city_code.into(),
			lat: city_coords.0,
			long: city_coords.1,
		});
		let state = ctx.states.get(state_code)
			.ok_or(ResolveError::MissingHomeState(state_code))?;
		resolved.state = Some(place(&state.name, &state.iso_3166_2, &state.geometry));
		match ctx.metros.get(cbsa) {
			Some(metro) => resolved.metro = Some(place(&metro.name, &metro.cbsa, &metro.geometry)),
			None => warn!("no metro boundary for CBSA code {}", cbsa),
		}
		return Ok(resolved)
	}

	let fips = match fips {
		Some(fips) => fips,
		None => return Ok(resolved),
	};
	let state_fips = if fips.len() >= 2 { &fips[..2] } else { &fips[..] };
	let state = match home.state_by_fips.get(state_fips) {
		Some(state) => *state,
		None => return Err(ResolveError::UnmappedStateFips(state_fips.into())),
	};
	resolved.state = Some(place(&state.name, &state.iso_3166_2, &state.geometry));

	if let Some(row) = ctx.testing.get(&testing_key(record_date, &state.iso_3166_2)) {
		resolved.testing = Some(row.clone());
	}

	if fips.len() == 5 && admin2.is_some() && admin2 != Some("Unassigned") {
		match ctx.counties.get(&fips) {
			Some(county) => {
				resolved.county = Some(place(&county.name, &county.fips, &county.geometry));
				if let Some(cbsa) = ctx.crosswalk.cbsa_for_county(&fips) {
					// no boundary for a delineated CBSA means a micropolitan
					// area, which has no metro item
					if let Some(metro) = ctx.metros.get(cbsa) {
						resolved.metro = Some(place(&metro.name, &metro.cbsa, &metro.geometry));
					}
				}
			},
			None => warn!("no county boundary for FIPS code {}", fips),
		}
	}
	Ok(resolved)
}

fn testing_key(date: chrono::NaiveDate, state_code: &str) -> SmartString {
	let mut key: SmartString = date.format("%Y-%m-%d").to_string().into();
	key.push('_');
	key.push_str(state_code);
	key
}


fn resolve_snapshot<'x>(
	record: DailyRecord,
	ctx: &GeoContext<'x>,
	country_by_coord: &HashMap<Coordinate, &'x CountryFeature>,
	state_by_coord: &HashMap<Coordinate, &'x StateFeature>,
) -> Result<ResolvedRecord, ResolveError> {
	let at = match record.coordinate() {
		Some(at) => at,
		None => return Err(ResolveError::MissingCoordinate(record.country_region.clone())),
	};
	let country = match country_by_coord.get(&at) {
		Some(feat) => *feat,
		None => ctx.countries.locate(at)?,
	};
	let mut region_wb = country.region_wb.clone();
	if country.iso3 == "CHN" {
		region_wb.push_str(": China");
	}
	let state = if record.province_state.is_some() {
		let feat = match state_by_coord.get(&at) {
			Some(feat) => *feat,
			None => ctx.states.locate(at)?,
		};
		Some(place(&feat.name, &feat.iso_3166_2, &feat.geometry))
	} else {
		None
	};
	Ok(ResolvedRecord{
		country: place(&country.name, &country.iso3, &country.geometry),
		country_population: country.population,
		region_wb,
		state,
		county: None,
		metro: None,
		city: None,
		gdp: ctx.gdp.get(&country.iso3),
		testing: None,
		record,
	})
}


/// Joins every record to the administrative hierarchy.
///
/// Point-in-polygon joins are computed once per distinct coordinate, in
/// parallel, and shared across all records at that coordinate.
pub fn resolve_all(records: Vec<DailyRecord>, ctx: &GeoContext) -> Result<Vec<ResolvedRecord>, ResolveError> {
	let home = HomeContext{
		country: ctx.countries.get("USA").ok_or(ResolveError::MissingHomeCountry)?,
		state_by_fips: us_states_by_fips(ctx.states),
	};

	let mut country_coords: HashSet<Coordinate> = HashSet::new();
	let mut state_coords: HashSet<Coordinate> = HashSet::new();
	for rec in records.iter() {
		if rec.source == Source::Reconciled || rec.is_cruise() {
			continue;
		}
		if let Some(at) = rec.coordinate() {
			country_coords.insert(at);
			if rec.province_state.is_some() {
				state_coords.insert(at);
			}
		}
	}
	info!(
		"resolving {} country and {} state coordinates",
		country_coords.len(), state_coords.len(),
	);

	let country_coords: Vec<Coordinate> = country_coords.into_iter().collect();
	let country_by_coord: HashMap<Coordinate, &CountryFeature> = country_coords
		.into_par_iter()
		.map(|at| Ok((at, ctx.countries.locate(at)?)))
		.collect::<Result<_, GeoError>>()?;
	let state_coords: Vec<Coordinate> = state_coords.into_iter().collect();
	let state_by_coord: HashMap<Coordinate, &StateFeature> = state_coords
		.into_par_iter()
		.map(|at| Ok((at, ctx.states.locate(at)?)))
		.collect::<Result<_, GeoError>>()?;

	records.into_par_iter()
		.map(|rec| {
			if rec.is_cruise() {
				Ok(resolve_cruise(rec))
			} else if rec.source == Source::Reconciled {
				resolve_reconciled(rec, ctx, &home)
			} else {
				resolve_snapshot(rec, ctx, &country_by_coord, &state_by_coord)
			}
		})
		.collect()
}


#[cfg(test)]
mod tests {
	use super::*;

	use chrono::NaiveDate;

	use geo::{Coord, LineString, MultiPolygon, Polygon};

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

	fn countries() -> PolygonIndex<CountryFeature> {
		PolygonIndex::build("countries", vec![
			CountryFeature{
				iso3: "USA".into(),
				name: "United States of America".into(),
				population: 326625791,
				region_wb: "North America".into(),
				geometry: square(-100.0, 30.0, 20.0),
			},
			CountryFeature{
				iso3: "CHN".into(),
				name: "China".into(),
				population: 1379302771,
				region_wb: "East Asia & Pacific".into(),
				geometry: square(90.0, 25.0, 20.0),
			},
		]).unwrap()
	}

	fn states() -> PolygonIndex<StateFeature> {
		PolygonIndex::build("states", vec![
			StateFeature{
				iso_3166_2: "US-WA".into(),
				name: "Washington".into(),
				country_iso3: "USA".into(),
				fips: Some("US53".into()),
				geometry: square(-100.0, 44.0, 6.0),
			},
			StateFeature{
				iso_3166_2: "CN-HB".into(),
				name: "Hubei".into(),
				country_iso3: "CHN".into(),
				fips: None,
				geometry: square(95.0, 28.0, 6.0),
			},
		]).unwrap()
	}

	fn counties() -> PolygonIndex<CountyFeature> {
		PolygonIndex::build("counties", vec![
			CountyFeature{
				fips: "53033".into(),
				state_fips: "53".into(),
				name: "King County".into(),
				geometry: square(-98.0, 46.0, 1.0),
			},
		]).unwrap()
	}

	fn metros() -> PolygonIndex<MetroFeature> {
		PolygonIndex::build("metros", vec![
			MetroFeature{
				cbsa: "42660".into(),
				name: "Seattle-Tacoma-Bellevue, WA".into(),
				geometry: square(-98.5, 45.5, 2.0),
			},
		]).unwrap()
	}

	fn record(country: &str, province: Option<&str>, lat: f64, long: f64) -> DailyRecord {
		DailyRecord{
			date: NaiveDate::from_ymd(2020, 3, 22),
			country_region: country.into(),
			province_state: province.map(|p| p.into()),
			admin2: None,
			fips: None,
			lat: Some(lat),
			long: Some(long),
			confirmed: 10,
			deaths: 1,
			recovered: 0,
			source: Source::DailySnapshot,
		}
	}

	fn context<'x>(
		countries: &'x PolygonIndex<CountryFeature>,
		states: &'x PolygonIndex<StateFeature>,
		counties: &'x PolygonIndex<CountyFeature>,
		metros: &'x PolygonIndex<MetroFeature>,
		crosswalk: &'x MetroCrosswalk,
		gdp: &'x GdpTable,
		testing: &'x TestingMap,
	) -> GeoContext<'x> {
		GeoContext{countries, states, counties, metros, crosswalk, gdp, testing}
	}

	#[test]
	fn snapshot_records_resolve_by_coordinate() {
		let countries = countries();
		let states = states();
		let counties = counties();
		let metros = metros();
		let crosswalk = MetroCrosswalk::default();
		let gdp = GdpTable::default();
		let testing = TestingMap::new();
		let ctx = context(&countries, &states, &counties, &metros, &crosswalk, &gdp, &testing);

		let resolved = resolve_all(vec![
			record("Mainland China", Some("Hubei"), 30.97, 97.27),
		], &ctx).unwrap();
		assert_eq!(resolved.len(), 1);
		assert_eq!(resolved[0].country.code, "CHN");
		assert_eq!(resolved[0].region_wb, "East Asia & Pacific: China");
		let state = resolved[0].state.as_ref().unwrap();
		assert_eq!(state.code, "CN-HB");
		assert_eq!(state.lat, Some(31.0));
	}

	#[test]
	fn cruise_records_form_their_own_hierarchy() {
		let countries = countries();
		let states = states();
		let counties = counties();
		let metros = metros();
		let crosswalk = MetroCrosswalk::default();
		let gdp = GdpTable::default();
		let testing = TestingMap::new();
		let ctx = context(&countries, &states, &counties, &metros, &crosswalk, &gdp, &testing);

		let mut rec = record("US", Some("Grand Princess"), CRUISE_LAT, CRUISE_LONG);
		rec.lat = Some(CRUISE_LAT);
		rec.long = Some(CRUISE_LONG);
		let resolved = resolve_all(vec![rec], &ctx).unwrap();
		assert_eq!(resolved[0].country.name, "Cruises");
		assert_eq!(resolved[0].country.code, "cruises");
		assert_eq!(resolved[0].country_population, 3533);
		let state = resolved[0].state.as_ref().unwrap();
		assert_eq!(state.name, "Grand Princess");
		assert_eq!(state.code, "grand_princess");
	}

	#[test]
	fn unnamed_cruises_default_to_the_diamond_princess() {
		assert_eq!(cruise_ship_name("US", Some("Cruise Ship")), "Diamond Princess");
		assert_eq!(cruise_ship_name("Diamond Princess", None), "Diamond Princess");
		assert_eq!(cruise_ship_name("US", Some("Grand Princess")), "Grand Princess");
	}

	#[test]
	fn reconciled_county_records_resolve_by_fips() {
		let countries = countries();
		let states = states();
		let counties = counties();
		let metros = metros();
		let crosswalk_csv = "title\nsource\n\
			CBSA Code,CBSA Title,FIPS State Code,FIPS County Code,County/County Equivalent,State Name\n\
			42660,\"Seattle-Tacoma-Bellevue, WA\",53,033,King County,Washington\n";
		let crosswalk = MetroCrosswalk::read(crosswalk_csv.as_bytes()).unwrap();
		let gdp = GdpTable::default();
		let testing = TestingMap::new();
		let ctx = context(&countries, &states, &counties, &metros, &crosswalk, &gdp, &testing);

		let mut rec = record("US", Some("Washington"), 0.0, 0.0);
		rec.lat = None;
		rec.long = None;
		rec.admin2 = Some("King".into());
		rec.fips = Some("53033".into());
		rec.source = Source::Reconciled;
		let resolved = resolve_all(vec![rec], &ctx).unwrap();
		let resolved = &resolved[0];
		assert_eq!(resolved.country.code, "USA");
		assert_eq!(resolved.state.as_ref().unwrap().code, "US-WA");
		assert_eq!(resolved.county.as_ref().unwrap().code, "53033");
		assert_eq!(resolved.metro.as_ref().unwrap().code, "42660");
		assert!(resolved.city.is_none());
	}

	#[test]
	fn unassigned_residuals_stop_at_the_state() {
		let countries = countries();
		let states = states();
		let counties = counties();
		let metros = metros();
		let crosswalk = MetroCrosswalk::default();
		let gdp = GdpTable::default();
		let mut testing = TestingMap::new();
		let mut row = serde_json::Map::new();
		row.insert("positive".into(), serde_json::Value::from(1996));
		testing.insert("2020-03-22_US-WA".into(), row);
		let ctx = context(&countries, &states, &counties, &metros, &crosswalk, &gdp, &testing);

		let mut rec = record("US", Some("Washington"), 0.0, 0.0);
		rec.lat = None;
		rec.long = None;
		rec.admin2 = Some("Unassigned".into());
		rec.fips = Some("53".into());
		rec.source = Source::Reconciled;
		let resolved = resolve_all(vec![rec], &ctx).unwrap();
		let resolved = &resolved[0];
		assert_eq!(resolved.state.as_ref().unwrap().code, "US-WA");
		assert!(resolved.county.is_none());
		let testing = resolved.testing.as_ref().unwrap();
		assert_eq!(testing.get("positive"), Some(&serde_json::Value::from(1996)));
	}

	#[test]
	fn unknown_state_fips_is_fatal() {
		let countries = countries();
		let states = states();
		let counties = counties();
		let metros = metros();
		let crosswalk = MetroCrosswalk::default();
		let gdp = GdpTable::default();
		let testing = TestingMap::new();
		let ctx = context(&countries, &states, &counties, &metros, &crosswalk, &gdp, &testing);

		let mut rec = record("US", Some("Atlantis"), 0.0, 0.0);
		rec.fips = Some("99".into());
		rec.source = Source::Reconciled;
		let result = resolve_all(vec![rec], &ctx);
		assert!(matches!(result, Err(ResolveError::UnmappedStateFips(_))));
	}
}
