use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use geo::prelude::*;
use geo::{MultiPolygon, Point, Polygon};

use log::warn;

use smartstring::alias::String as SmartString;


/// A latitude/longitude pair usable as a hash key.
///
/// Coordinates are used to key the precomputed point->feature maps, so they
/// need bitwise equality semantics rather than float semantics.
#[derive(Debug, Clone, Copy)]
pub struct Coordinate {
	pub lat: f64,
	pub long: f64,
}

impl Coordinate {
	pub fn new(lat: f64, long: f64) -> Self {
		Self{lat, long}
	}

	pub fn point(&self) -> Point<f64> {
		Point::new(self.long, self.lat)
	}
}

impl PartialEq for Coordinate {
	fn eq(&self, other: &Self) -> bool {
		self.lat.to_bits() == other.lat.to_bits() && self.long.to_bits() == other.long.to_bits()
	}
}

impl Eq for Coordinate {}

impl Hash for Coordinate {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.lat.to_bits().hash(state);
		self.long.to_bits().hash(state);
	}
}


#[derive(Debug)]
pub enum GeoError {
	EmptyIndex(&'static str),
}

impl fmt::Display for GeoError {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::EmptyIndex(layer) => write!(f, "polygon layer {} has no features to search", layer),
		}
	}
}

impl std::error::Error for GeoError {}


/// A boundary feature that can be held in a [`PolygonIndex`].
pub trait IndexedFeature {
	fn unique_key(&self) -> &str;
	fn geometry(&self) -> &MultiPolygon<f64>;
}


fn min_ring_distance(geom: &MultiPolygon<f64>, point: Point<f64>) -> f64 {
	let mut min_dist = f64::INFINITY;
	for poly in geom.iter() {
		let d = point.euclidean_distance(poly.exterior());
		if d < min_dist {
			min_dist = d;
		}
	}
	min_dist
}

fn largest_part(geom: &MultiPolygon<f64>) -> Option<&Polygon<f64>> {
	let mut max_area = -1.0;
	let mut max_poly = None;
	for poly in geom.iter() {
		let area = poly.unsigned_area();
		if area > max_area {
			max_area = area;
			max_poly = Some(poly);
		}
	}
	max_poly
}

/// Representative point of a boundary geometry, as `(long, lat)`.
///
/// For a multi-polygon this is the centroid of the largest constituent
/// polygon, not of the combined geometry. The combined centroid of disjoint
/// landmasses can land in open water.
pub fn centroid(geom: &MultiPolygon<f64>) -> Option<(f64, f64)> {
	let point = largest_part(geom)?.centroid()?;
	Some((point.x(), point.y()))
}


/// Point-in-polygon and nearest-polygon queries over one administrative
/// layer.
///
/// Feature sets are small (at most a few thousand entries), so queries are
/// linear scans and the index is just a key map on top of the feature list.
pub struct PolygonIndex<F> {
	layer: &'static str,
	features: Vec<F>,
	by_key: HashMap<SmartString, usize>,
}

impl<F: IndexedFeature> PolygonIndex<F> {
	/// Builds the index, deduplicating features that share a unique key.
	///
	/// Some public boundary files ship disjoint duplicate polygons under one
	/// code; only the duplicate with the largest area is kept.
	pub fn build(layer: &'static str, features: Vec<F>) -> Result<Self, GeoError> {
		if features.is_empty() {
			return Err(GeoError::EmptyIndex(layer))
		}
		let mut kept: Vec<F> = Vec::with_capacity(features.len());
		let mut by_key: HashMap<SmartString, usize> = HashMap::new();
		for feat in features {
			let key: SmartString = feat.unique_key().into();
			match by_key.get(&key) {
				Some(&index) => {
					warn!("duplicate {} feature for key {}, keeping largest", layer, key);
					let old_area = kept[index].geometry().unsigned_area();
					let new_area = feat.geometry().unsigned_area();
					if new_area > old_area {
						kept[index] = feat;
					}
				},
				None => {
					by_key.insert(key, kept.len());
					kept.push(feat);
				},
			}
		}
		Ok(Self{
			layer,
			features: kept,
			by_key,
		})
	}

	pub fn layer(&self) -> &'static str {
		self.layer
	}

	pub fn len(&self) -> usize {
		self.features.len()
	}

	pub fn features(&self) -> &[F] {
		&self.features[..]
	}

	pub fn get(&self, key: &str) -> Option<&F> {
		let index = *self.by_key.get(key)?;
		Some(&self.features[index])
	}

	/// True point-in-polygon test.
	pub fn contains(&self, at: Coordinate) -> Option<&F> {
		let point = at.point();
		for feat in self.features.iter() {
			if feat.geometry().contains(&point) {
				return Some(feat)
			}
		}
		None
	}

	/// Feature whose exterior ring is closest to the point.
	///
	/// Used for points that fall just outside every boundary because of
	/// coordinate rounding or simplified geometry.
	pub fn nearest(&self, at: Coordinate) -> Option<&F> {
		let point = at.point();
		let mut min_dist = f64::INFINITY;
		let mut closest = None;
		for feat in self.features.iter() {
			let d = min_ring_distance(feat.geometry(), point);
			if d < min_dist {
				min_dist = d;
				closest = Some(feat);
			}
		}
		closest
	}

	/// Containment first, nearest boundary as the fallback.
	pub fn locate(&self, at: Coordinate) -> Result<&F, GeoError> {
		if let Some(feat) = self.contains(at) {
			return Ok(feat)
		}
		match self.nearest(at) {
			Some(feat) => Ok(feat),
			None => Err(GeoError::EmptyIndex(self.layer)),
		}
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	use geo::{Coord, LineString};

	struct TestFeature {
		key: &'static str,
		geometry: MultiPolygon<f64>,
	}

	impl IndexedFeature for TestFeature {
		fn unique_key(&self) -> &str {
			self.key
		}

		fn geometry(&self) -> &MultiPolygon<f64> {
			&self.geometry
		}
	}

	fn square(x0: f64, y0: f64, side: f64) -> Polygon<f64> {
		Polygon::new(
			LineString(vec![
				Coord{x: x0, y: y0},
				Coord{x: x0 + side, y: y0},
				Coord{x: x0 + side, y: y0 + side},
				Coord{x: x0, y: y0 + side},
				Coord{x: x0, y: y0},
			]),
			vec![],
		)
	}

	fn feature(key: &'static str, polys: Vec<Polygon<f64>>) -> TestFeature {
		TestFeature{key, geometry: MultiPolygon(polys)}
	}

	#[test]
	fn build_rejects_empty_layer() {
		let result = PolygonIndex::<TestFeature>::build("test", vec![]);
		assert!(result.is_err());
	}

	#[test]
	fn build_dedups_by_largest_area() {
		let index = PolygonIndex::build("test", vec![
			feature("XXA", vec![square(0.0, 0.0, 1.0)]),
			feature("XXA", vec![square(10.0, 10.0, 3.0)]),
			feature("XXB", vec![square(20.0, 20.0, 1.0)]),
		]).unwrap();
		assert_eq!(index.len(), 2);
		let kept = index.get("XXA").unwrap();
		assert!((kept.geometry.unsigned_area() - 9.0).abs() < 1e-9);
	}

	#[test]
	fn centroid_uses_largest_part_only() {
		// parts of area 5, 10 and 3; the centroid must come from the
		// area-10 part alone
		let geom = MultiPolygon(vec![
			square(0.0, 0.0, 5.0f64.sqrt()),
			square(100.0, 100.0, 10.0f64.sqrt()),
			square(-50.0, -50.0, 3.0f64.sqrt()),
		]);
		let (long, lat) = centroid(&geom).unwrap();
		let half = 10.0f64.sqrt() / 2.0;
		assert!((long - (100.0 + half)).abs() < 1e-9);
		assert!((lat - (100.0 + half)).abs() < 1e-9);
	}

	#[test]
	fn containment_takes_precedence_over_distance() {
		// the point sits inside the large polygon but closer to the small
		// polygon's boundary
		let index = PolygonIndex::build("test", vec![
			feature("BIG", vec![square(0.0, 0.0, 100.0)]),
			feature("SMALL", vec![square(100.5, 50.0, 1.0)]),
		]).unwrap();
		let at = Coordinate::new(50.0, 99.9);
		assert_eq!(index.locate(at).unwrap().key, "BIG");
	}

	#[test]
	fn nearest_feature_for_outside_point() {
		let index = PolygonIndex::build("test", vec![
			feature("XXA", vec![square(0.0, 0.0, 1.0)]),
			feature("XXB", vec![square(10.0, 0.0, 1.0)]),
		]).unwrap();
		// just east of XXB, contained by nothing
		let at = Coordinate::new(0.5, 11.2);
		assert!(index.contains(at).is_none());
		assert_eq!(index.locate(at).unwrap().key, "XXB");
	}
}
