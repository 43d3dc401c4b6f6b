use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};

use super::series::{Metric, UnitSeries};


fn round3(v: f64) -> f64 {
	(v * 1e3).round() / 1e3
}


/// Derived figures for one metric of one unit and day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricStats {
	pub value: u64,
	pub num_increase: i64,
	pub pct_increase: Option<f64>,
	pub rolling: Option<f64>,
	pub rolling_14days_ago: Option<f64>,
	pub rolling_14days_ago_diff: Option<f64>,
	pub doubling_rate: Option<f64>,
	pub first_date: Option<NaiveDate>,
	pub new_today: bool,
}


/// Derived figures for one unit and day across all metrics.
#[derive(Debug, Clone)]
pub struct UnitStats {
	pub most_recent: bool,
	pub confirmed: MetricStats,
	pub recovered: MetricStats,
	pub dead: MetricStats,
	pub first_dead_minus_first_confirmed: Option<i64>,
	pub days_since_100_cases: Option<f64>,
	pub days_since_10_deaths: Option<f64>,
	pub days_since_50_deaths: Option<f64>,
}

impl UnitStats {
	pub fn metric(&self, metric: Metric) -> &MetricStats {
		match metric {
			Metric::Confirmed => &self.confirmed,
			Metric::Recovered => &self.recovered,
			Metric::Dead => &self.dead,
		}
	}
}


/// Increase over the previous calendar day.
///
/// A missing previous day marks the start of the series and the whole value
/// counts as the increase. Cumulative counters do get revised downwards, so
/// the result can be negative.
pub fn num_increase(series: &BTreeMap<NaiveDate, u64>, date: NaiveDate) -> i64 {
	let current = series.get(&date).copied().unwrap_or(0) as i64;
	match series.get(&(date - Duration::days(1))) {
		Some(&prev) => current - prev as i64,
		None => current,
	}
}

fn pct_increase(series: &BTreeMap<NaiveDate, u64>, date: NaiveDate) -> Option<f64> {
	let prev = series.get(&(date - Duration::days(1))).copied()?;
	if prev == 0 {
		return None
	}
	let current = series.get(&date).copied().unwrap_or(0) as i64;
	Some((current - prev as i64) as f64 / prev as f64)
}

/// Mean of the daily increases over the seven days centred on `anchor`.
///
/// Only days actually present in the series contribute, and negative
/// increases (downward revisions) are excluded from the mean. The anchor
/// itself need not be present; that lets the same window serve the
/// two-weeks-ago comparison, where the anchored day usually has no entry.
pub fn rolling_average(series: &BTreeMap<NaiveDate, u64>, anchor: NaiveDate) -> Option<f64> {
	let from = anchor - Duration::days(3);
	let to = anchor + Duration::days(3);
	let mut sum = 0i64;
	let mut n = 0u32;
	for (&date, _) in series.range(from..=to) {
		let increase = num_increase(series, date);
		if increase >= 0 {
			sum += increase;
			n += 1;
		}
	}
	if n == 0 {
		return None
	}
	Some(sum as f64 / n as f64)
}

fn linear_slope(values: &[f64]) -> f64 {
	let n = values.len() as f64;
	let x_mean = (values.len() - 1) as f64 / 2.0;
	let y_mean: f64 = values.iter().sum::<f64>() / n;
	let mut num = 0.0;
	let mut den = 0.0;
	for (i, &y) in values.iter().enumerate() {
		let dx = i as f64 - x_mean;
		num += dx * (y - y_mean);
		den += dx * dx;
	}
	num / den
}

/// Doubling time in days, from a log-linear fit over the values of the five
/// days up to and including `date`.
///
/// Zero values cannot be log-fitted and are left out; fewer than two usable
/// values, a non-positive slope or a non-finite result all mean there is no
/// meaningful doubling time.
pub fn doubling_rate(series: &BTreeMap<NaiveDate, u64>, date: NaiveDate) -> Option<f64> {
	let from = date - Duration::days(4);
	let values: Vec<f64> = series.range(from..=date)
		.map(|(_, &v)| v)
		.filter(|&v| v > 0)
		.map(|v| (v as f64).ln())
		.collect();
	if values.len() < 2 {
		return None
	}
	let slope = round3(linear_slope(&values[..]));
	if slope <= 0.0 {
		return None
	}
	let rate = std::f64::consts::LN_2 / slope;
	if !rate.is_finite() {
		return None
	}
	Some(round3(rate))
}

fn first_positive_date(series: &BTreeMap<NaiveDate, u64>) -> Option<NaiveDate> {
	series.iter()
		.find(|(_, &v)| v > 0)
		.map(|(&date, _)| date)
}

fn new_today(series: &BTreeMap<NaiveDate, u64>) -> bool {
	let mut tail = series.values().rev();
	match (tail.next(), tail.next()) {
		(Some(&last), Some(&prev)) => last > prev,
		_ => false,
	}
}

/// Days since the series crossed `threshold`, interpolated between the last
/// day below and the first day at or above it.
pub fn days_since(series: &BTreeMap<NaiveDate, u64>, threshold: u64, current: NaiveDate) -> Option<f64> {
	let (first_gte, v_gte) = series.iter()
		.find(|(_, &v)| v >= threshold)
		.map(|(&d, &v)| (d, v))?;
	let v_lt = series.iter()
		.rev()
		.find(|(_, &v)| v < threshold)
		.map(|(_, &v)| v)?;
	let offset = 1.0 - (threshold - v_lt) as f64 / (v_gte - v_lt) as f64;
	let days = (current - first_gte).num_days() as f64 + offset;
	Some(round3(days))
}


fn metric_stats(series: &BTreeMap<NaiveDate, u64>, date: NaiveDate) -> MetricStats {
	// rolling and doubling figures are only published for days the unit
	// actually reported on
	let reported = series.contains_key(&date);
	let rolling = if reported {
		rolling_average(series, date)
	} else {
		None
	};
	let rolling_14days_ago = if reported {
		rolling_average(series, date - Duration::days(14))
	} else {
		None
	};
	let rolling_14days_ago_diff = match (rolling, rolling_14days_ago) {
		(Some(now), Some(then)) => Some(now - then),
		_ => None,
	};
	MetricStats{
		value: series.get(&date).copied().unwrap_or(0),
		num_increase: num_increase(series, date),
		pct_increase: pct_increase(series, date),
		rolling,
		rolling_14days_ago,
		rolling_14days_ago_diff,
		doubling_rate: if reported { doubling_rate(series, date) } else { None },
		first_date: first_positive_date(series),
		new_today: new_today(series),
	}
}

/// All derived figures for one unit at one date.
pub fn unit_stats(unit: &UnitSeries, date: NaiveDate) -> UnitStats {
	let confirmed_series = unit.metric_series(Metric::Confirmed);
	let recovered_series = unit.metric_series(Metric::Recovered);
	let dead_series = unit.metric_series(Metric::Dead);

	let confirmed = metric_stats(&confirmed_series, date);
	let recovered = metric_stats(&recovered_series, date);
	let dead = metric_stats(&dead_series, date);

	let first_dead_minus_first_confirmed = match (dead.first_date, confirmed.first_date) {
		(Some(fd), Some(fc)) => Some((fd - fc).num_days()),
		_ => None,
	};

	let emit_if_past = |v: Option<f64>| v.filter(|&d| d >= 0.0);

	UnitStats{
		most_recent: unit.last_date() == Some(date),
		first_dead_minus_first_confirmed,
		days_since_100_cases: emit_if_past(days_since(&confirmed_series, 100, date)),
		days_since_10_deaths: emit_if_past(days_since(&dead_series, 10, date)),
		days_since_50_deaths: emit_if_past(days_since(&dead_series, 50, date)),
		confirmed,
		recovered,
		dead,
	}
}
