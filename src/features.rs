use std::convert::TryFrom;
use std::fmt;
use std::io;
use std::io::Read;

use geo::MultiPolygon;

use geojson::{FeatureCollection, GeoJson};

use smartstring::alias::String as SmartString;

use super::geometry::IndexedFeature;


#[derive(Debug)]
pub enum LoadError {
	Io(io::Error),
	GeoJson(geojson::Error),
	MissingProperty(&'static str),
	UnsupportedGeometry,
}

impl fmt::Display for LoadError {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Io(e) => fmt::Display::fmt(e, f),
			Self::GeoJson(e) => fmt::Display::fmt(e, f),
			Self::MissingProperty(name) => write!(f, "feature lacks required property {}", name),
			Self::UnsupportedGeometry => f.write_str("feature geometry is not a polygon or multi-polygon"),
		}
	}
}

impl From<io::Error> for LoadError {
	fn from(err: io::Error) -> Self {
		Self::Io(err)
	}
}

impl From<geojson::Error> for LoadError {
	fn from(err: geojson::Error) -> Self {
		Self::GeoJson(err)
	}
}

impl std::error::Error for LoadError {}


/// Country boundary with the properties used for identity and reporting.
#[derive(Debug, Clone)]
pub struct CountryFeature {
	pub iso3: SmartString,
	pub name: SmartString,
	pub population: u64,
	pub region_wb: SmartString,
	pub geometry: MultiPolygon<f64>,
}

impl IndexedFeature for CountryFeature {
	fn unique_key(&self) -> &str {
		&self.iso3
	}

	fn geometry(&self) -> &MultiPolygon<f64> {
		&self.geometry
	}
}


/// State/province boundary.
///
/// `fips` is only present for US states and territories and carries the
/// two-character country prefix of the source data (for example `US36`).
#[derive(Debug, Clone)]
pub struct StateFeature {
	pub iso_3166_2: SmartString,
	pub name: SmartString,
	pub country_iso3: SmartString,
	pub fips: Option<SmartString>,
	pub geometry: MultiPolygon<f64>,
}

impl StateFeature {
	/// Bare two-digit state FIPS, without the country prefix.
	///
	/// A value consisting of the prefix alone carries no state code.
	pub fn state_fips(&self) -> Option<&str> {
		let fips = self.fips.as_deref()?;
		if fips.len() <= 2 {
			return None
		}
		Some(&fips[2..])
	}
}

impl IndexedFeature for StateFeature {
	fn unique_key(&self) -> &str {
		&self.iso_3166_2
	}

	fn geometry(&self) -> &MultiPolygon<f64> {
		&self.geometry
	}
}


/// US county boundary, keyed by the concatenated state+county FIPS code.
#[derive(Debug, Clone)]
pub struct CountyFeature {
	pub fips: SmartString,
	pub state_fips: SmartString,
	pub name: SmartString,
	pub geometry: MultiPolygon<f64>,
}

impl IndexedFeature for CountyFeature {
	fn unique_key(&self) -> &str {
		&self.fips
	}

	fn geometry(&self) -> &MultiPolygon<f64> {
		&self.geometry
	}
}


/// US metropolitan area boundary, keyed by CBSA code.
#[derive(Debug, Clone)]
pub struct MetroFeature {
	pub cbsa: SmartString,
	pub name: SmartString,
	pub geometry: MultiPolygon<f64>,
}

impl IndexedFeature for MetroFeature {
	fn unique_key(&self) -> &str {
		&self.cbsa
	}

	fn geometry(&self) -> &MultiPolygon<f64> {
		&self.geometry
	}
}


fn read_collection<R: Read>(mut r: R) -> Result<FeatureCollection, LoadError> {
	let mut buf = String::new();
	r.read_to_string(&mut buf)?;
	let gj = buf.parse::<GeoJson>()?;
	Ok(FeatureCollection::try_from(gj)?)
}

fn multi_polygon(feat: &geojson::Feature) -> Result<MultiPolygon<f64>, LoadError> {
	let geometry = match &feat.geometry {
		Some(g) => g,
		None => return Err(LoadError::UnsupportedGeometry),
	};
	match &geometry.value {
		v @ geojson::Value::Polygon(_) => {
			let poly = geo::Polygon::<f64>::try_from(v.clone())?;
			Ok(MultiPolygon(vec![poly]))
		},
		v @ geojson::Value::MultiPolygon(_) => {
			Ok(MultiPolygon::<f64>::try_from(v.clone())?)
		},
		_ => Err(LoadError::UnsupportedGeometry),
	}
}

fn prop_str(feat: &geojson::Feature, name: &'static str) -> Result<SmartString, LoadError> {
	match feat.property(name) {
		Some(serde_json::Value::String(s)) => Ok(s.trim().into()),
		_ => Err(LoadError::MissingProperty(name)),
	}
}

fn prop_str_opt(feat: &geojson::Feature, name: &'static str) -> Option<SmartString> {
	match feat.property(name) {
		Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.trim().into()),
		_ => None,
	}
}

fn prop_u64(feat: &geojson::Feature, name: &'static str) -> Result<u64, LoadError> {
	// population estimates sometimes come as floats
	match feat.property(name).and_then(|v| v.as_f64()) {
		Some(v) if v >= 0.0 => Ok(v as u64),
		_ => Err(LoadError::MissingProperty(name)),
	}
}


pub fn load_countries<R: Read>(r: R) -> Result<Vec<CountryFeature>, LoadError> {
	let collection = read_collection(r)?;
	let mut result = Vec::with_capacity(collection.features.len());
	for feat in collection.features.iter() {
		result.push(CountryFeature{
			iso3: prop_str(feat, "ADM0_A3")?,
			name: prop_str(feat, "NAME")?,
			population: prop_u64(feat, "POP_EST")?,
			region_wb: prop_str(feat, "REGION_WB")?,
			geometry: multi_polygon(feat)?,
		});
	}
	Ok(result)
}

pub fn load_states<R: Read>(r: R) -> Result<Vec<StateFeature>, LoadError> {
	let collection = read_collection(r)?;
	let mut result = Vec::with_capacity(collection.features.len());
	for feat in collection.features.iter() {
		result.push(StateFeature{
			iso_3166_2: prop_str(feat, "iso_3166_2")?,
			name: prop_str(feat, "name")?,
			country_iso3: prop_str(feat, "adm0_a3")?,
			fips: prop_str_opt(feat, "fips"),
			geometry: multi_polygon(feat)?,
		});
	}
	Ok(result)
}

pub fn load_counties<R: Read>(r: R) -> Result<Vec<CountyFeature>, LoadError> {
	let collection = read_collection(r)?;
	let mut result = Vec::with_capacity(collection.features.len());
	for feat in collection.features.iter() {
		let state_fips = prop_str(feat, "STATEFP")?;
		let county_fips = prop_str(feat, "COUNTYFP")?;
		let mut fips = state_fips.clone();
		fips.push_str(&county_fips);
		result.push(CountyFeature{
			fips,
			state_fips,
			name: prop_str(feat, "NAMELSAD")?,
			geometry: multi_polygon(feat)?,
		});
	}
	Ok(result)
}

pub fn load_metros<R: Read>(r: R) -> Result<Vec<MetroFeature>, LoadError> {
	let collection = read_collection(r)?;
	let mut result = Vec::with_capacity(collection.features.len());
	for feat in collection.features.iter() {
		result.push(MetroFeature{
			cbsa: prop_str(feat, "CBSAFP")?,
			name: prop_str(feat, "NAME")?,
			geometry: multi_polygon(feat)?,
		});
	}
	Ok(result)
}


#[cfg(test)]
mod tests {
	use super::*;

	static COUNTRY_COLLECTION: &'static str = r#"{
		"type": "FeatureCollection",
		"features": [
			{
				"type": "Feature",
				"properties": {
					"ADM0_A3": "BLZ",
					"NAME": "Belize",
					"POP_EST": 390353.0,
					"REGION_WB": "Latin America & Caribbean"
				},
				"geometry": {
					"type": "Polygon",
					"coordinates": [[[-89.2, 15.9], [-88.1, 15.9], [-88.1, 18.5], [-89.2, 18.5], [-89.2, 15.9]]]
				}
			}
		]
	}"#;

	#[test]
	fn loads_country_properties() {
		let features = load_countries(COUNTRY_COLLECTION.as_bytes()).unwrap();
		assert_eq!(features.len(), 1);
		let belize = &features[0];
		assert_eq!(belize.iso3, "BLZ");
		assert_eq!(belize.name, "Belize");
		assert_eq!(belize.population, 390353);
		assert_eq!(belize.geometry.0.len(), 1);
	}

	#[test]
	fn state_fips_strips_country_prefix() {
		let state = |fips: Option<&str>| StateFeature{
			iso_3166_2: "US-NY".into(),
			name: "New York".into(),
			country_iso3: "USA".into(),
			fips: fips.map(|f| f.into()),
			geometry: MultiPolygon(vec![]),
		};
		assert_eq!(state(Some("US36")).state_fips(), Some("36"));
		assert_eq!(state(None).state_fips(), None);
		// a bare country prefix must not map to the empty state code
		assert_eq!(state(Some("US")).state_fips(), None);
	}
}
