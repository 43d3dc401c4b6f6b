use std::fs;
use std::io;

use log::info;

use outbreak::{
	backfill_coordinates, daily_report_paths, emit_all, fetch_testing_data,
	fix_wrong_centroids, load_counties, load_countries, load_metros,
	load_states, magic_open, merge, read_daily_report, reconcile,
	report_date_from_filename, resolve_all, DailyRecord, GdpTable, GeoContext,
	IndexedFeature, MetroCrosswalk, PolygonIndex, ProgressMeter, ProgressSink,
	DEFAULT_TESTING_URL,
};


static USAGE: &'static str = "usage: aggregate <reports-dir> <county-csv> <state-csv> \
<countries-geojson> <states-geojson> <counties-geojson> <metros-geojson> \
<crosswalk-csv> <gdp-csv> <output-json> [testing-url]";


fn load_layer<F, L>(
	layer: &'static str,
	path: &str,
	loader: L,
) -> Result<PolygonIndex<F>, Box<dyn std::error::Error>>
	where F: IndexedFeature,
		L: Fn(Box<dyn io::Read>) -> Result<Vec<F>, outbreak::LoadError>,
{
	let features = loader(magic_open(path)?)?;
	let index = PolygonIndex::build(layer, features)?;
	info!("loaded {} {} boundaries", index.len(), layer);
	Ok(index)
}

fn load_reports(dir: &str) -> Result<Vec<DailyRecord>, Box<dyn std::error::Error>> {
	let paths = daily_report_paths(dir)?;
	info!("loading {} daily reports from {}", paths.len(), dir);
	let mut records = Vec::new();
	let mut pm = ProgressMeter::start(paths.len());
	for (i, path) in paths.iter().enumerate() {
		let date = report_date_from_filename(path)?;
		records.extend(read_daily_report(magic_open(path)?, date)?);
		pm.update(i + 1);
	}
	pm.finish();
	info!("loaded {} records", records.len());
	Ok(records)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	env_logger::init();

	let argv: Vec<String> = std::env::args().collect();
	if argv.len() < 11 {
		eprintln!("{}", USAGE);
		std::process::exit(2);
	}
	let reports_dir = &argv[1];
	let county_csv = &argv[2];
	let state_csv = &argv[3];
	let countries_path = &argv[4];
	let states_path = &argv[5];
	let counties_path = &argv[6];
	let metros_path = &argv[7];
	let crosswalk_path = &argv[8];
	let gdp_path = &argv[9];
	let output_path = &argv[10];
	let testing_url = argv.get(11).map(|s| &s[..]).unwrap_or(DEFAULT_TESTING_URL);

	let countries = load_layer("country", countries_path, load_countries)?;
	let states = load_layer("state", states_path, load_states)?;
	let counties = load_layer("county", counties_path, load_counties)?;
	let metros = load_layer("metro", metros_path, load_metros)?;

	let crosswalk = MetroCrosswalk::read(magic_open(crosswalk_path)?)?;
	let gdp = GdpTable::read(magic_open(gdp_path)?)?;

	let mut records = load_reports(reports_dir)?;
	fix_wrong_centroids(&mut records, &countries);
	backfill_coordinates(&mut records);

	info!("reconciling US records ...");
	let reconciled = reconcile(
		magic_open(county_csv)?,
		magic_open(state_csv)?,
		&states,
		&counties,
	)?;
	merge(&mut records, reconciled);
	info!("{} records after reconciliation", records.len());

	let testing = fetch_testing_data(testing_url, &states);

	info!("resolving records to the administrative hierarchy ...");
	let ctx = GeoContext{
		countries: &countries,
		states: &states,
		counties: &counties,
		metros: &metros,
		crosswalk: &crosswalk,
		gdp: &gdp,
		testing: &testing,
	};
	let resolved = resolve_all(records, &ctx)?;

	info!("generating items ...");
	let items = emit_all(&resolved[..], &crosswalk);

	let out = io::BufWriter::new(fs::File::create(output_path)?);
	serde_json::to_writer(out, &items)?;
	info!("wrote {} items to {}", items.len(), output_path);

	Ok(())
}
