use std::fs;
use std::io;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2;


/// Opens a file, transparently decompressing `.gz` members.
pub fn magic_open<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn Read>> {
	let path = path.as_ref();
	match path.extension() {
		Some(x) if x == "gz" => {
			Ok(Box::new(flate2::read::GzDecoder::new(fs::File::open(path)?)))
		},
		_ => Ok(Box::new(fs::File::open(path)?)),
	}
}


fn is_report_file(path: &Path) -> bool {
	let name = match path.file_name().and_then(|n| n.to_str()) {
		Some(name) => name,
		None => return false,
	};
	name.ends_with(".csv") || name.ends_with(".csv.gz")
}

/// All daily snapshot files in a directory, sorted by filename.
pub fn daily_report_paths<P: AsRef<Path>>(dir: P) -> io::Result<Vec<PathBuf>> {
	let mut result = Vec::new();
	for entry in fs::read_dir(dir)? {
		let path = entry?.path();
		if path.is_file() && is_report_file(&path) {
			result.push(path);
		}
	}
	result.sort();
	Ok(result)
}
