use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};

use log::info;

use serde::Serialize;

use smartstring::alias::String as SmartString;

use super::report::ReportError;


/// One county belonging to a metropolitan area, as published in the output.
#[derive(Debug, Clone, Serialize)]
pub struct MetroMember {
	pub county_name: SmartString,
	pub state_name: SmartString,
	pub fips: SmartString,
}


/// Census delineation of counties into metropolitan/micropolitan areas.
///
/// Maps a five-digit county FIPS code to its CBSA code and the CBSA code
/// back to the member counties.
#[derive(Debug, Default)]
pub struct MetroCrosswalk {
	by_fips: HashMap<SmartString, SmartString>,
	members: HashMap<SmartString, Vec<MetroMember>>,
}

impl MetroCrosswalk {
	/// Reads the census delineation file.
	///
	/// The file opens with two lines of title text before the header row and
	/// closes with footnote rows that have no county code; both are skipped.
	pub fn read<R: Read>(r: R) -> Result<Self, ReportError> {
		let mut r = BufReader::new(r);
		let mut skip = String::new();
		r.read_line(&mut skip)?;
		skip.clear();
		r.read_line(&mut skip)?;

		let mut reader = csv::Reader::from_reader(r);
		let headers = reader.headers()?.clone();
		let column = |name: &'static str| {
			headers.iter().position(|h| h.trim() == name)
				.ok_or(ReportError::MissingColumn(name))
		};
		let cbsa_col = column("CBSA Code")?;
		let state_fips_col = column("FIPS State Code")?;
		let county_fips_col = column("FIPS County Code")?;
		let county_name_col = column("County/County Equivalent")?;
		let state_name_col = column("State Name")?;

		let mut result = Self::default();
		for row in reader.records() {
			let row = row?;
			let county_fips = match row.get(county_fips_col).map(|s| s.trim()) {
				Some(s) if !s.is_empty() => s,
				_ => continue,
			};
			let cbsa: SmartString = match row.get(cbsa_col).map(|s| s.trim()) {
				Some(s) if !s.is_empty() => s.into(),
				_ => continue,
			};
			let state_fips = row.get(state_fips_col).map(|s| s.trim()).unwrap_or("");
			let mut fips: SmartString = state_fips.into();
			for _ in county_fips.len()..3 {
				fips.push('0');
			}
			fips.push_str(county_fips);

			result.by_fips.insert(fips.clone(), cbsa.clone());
			result.members.entry(cbsa).or_default().push(MetroMember{
				county_name: row.get(county_name_col).map(|s| s.trim()).unwrap_or("").into(),
				state_name: row.get(state_name_col).map(|s| s.trim()).unwrap_or("").into(),
				fips,
			});
		}
		info!("metro crosswalk covers {} counties", result.by_fips.len());
		Ok(result)
	}

	/// CBSA code of the metro area containing the county, if any.
	///
	/// Counties outside any metropolitan area are the norm, not an error.
	pub fn cbsa_for_county(&self, fips: &str) -> Option<&str> {
		self.by_fips.get(fips).map(|s| &s[..])
	}

	pub fn counties_of(&self, cbsa: &str) -> &[MetroMember] {
		self.members.get(cbsa).map(|v| &v[..]).unwrap_or(&[])
	}
}


/// Per-country GDP per capita, keyed by ISO3 code.
///
/// For each country the most recent year with a published value wins.
#[derive(Debug, Default)]
pub struct GdpTable {
	by_iso3: HashMap<SmartString, (u16, f64)>,
}

impl GdpTable {
	/// Reads the world bank GDP-per-capita export.
	///
	/// The export has two lines of preamble before the header row and one
	/// column per year; years are scanned newest first, starting at 2018.
	pub fn read<R: Read>(r: R) -> Result<Self, ReportError> {
		let mut r = BufReader::new(r);
		let mut skip = String::new();
		r.read_line(&mut skip)?;
		skip.clear();
		r.read_line(&mut skip)?;

		let mut reader = csv::Reader::from_reader(r);
		let headers = reader.headers()?.clone();
		let code_col = headers.iter().position(|h| h.trim() == "Country Code")
			.ok_or(ReportError::MissingColumn("Country Code"))?;
		let year_cols: Vec<(u16, usize)> = (1961..=2018).rev()
			.filter_map(|year| {
				let col = headers.iter().position(|h| h.trim() == year.to_string())?;
				Some((year, col))
			})
			.collect();

		let mut result = Self::default();
		for row in reader.records() {
			let row = row?;
			let iso3 = match row.get(code_col).map(|s| s.trim()) {
				Some(s) if !s.is_empty() => s,
				_ => continue,
			};
			for &(year, col) in year_cols.iter() {
				let value = row.get(col).map(|s| s.trim()).unwrap_or("");
				if let Ok(value) = value.parse::<f64>() {
					result.by_iso3.insert(iso3.into(), (year, value));
					break;
				}
			}
		}
		info!("GDP table covers {} countries", result.by_iso3.len());
		Ok(result)
	}

	pub fn get(&self, iso3: &str) -> Option<(u16, f64)> {
		self.by_iso3.get(iso3).copied()
	}
}
