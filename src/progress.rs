use std::io;
use std::io::Write;
use std::time;


pub trait ProgressSink {
	fn update(&mut self, inow: usize);
	fn finish(self);
}


/// Console meter for long file-loading loops.
pub struct ProgressMeter {
	t0: time::Instant,
	tprev: time::Instant,
	iprev: usize,
	n: usize,
}

impl ProgressMeter {
	pub fn start(n: usize) -> Self {
		let now = time::Instant::now();
		print!("{:6.0}% [{:6.2}/s]\r", 0.0, 0.0);
		let _ = io::stdout().flush();
		Self{
			t0: now,
			tprev: now,
			iprev: 0,
			n,
		}
	}
}

impl ProgressSink for ProgressMeter {
	fn update(&mut self, inow: usize) {
		let now = time::Instant::now();
		let dt = (now - self.tprev).as_secs_f64();
		let rate = (inow - self.iprev) as f64 / dt;
		let done = inow as f64 / self.n as f64;
		print!("{:6.0}% [{:6.2}/s]\r", done * 100.0, rate);
		let _ = io::stdout().flush();
		self.iprev = inow;
		self.tprev = now;
	}

	fn finish(self) {
		let dt = (time::Instant::now() - self.t0).as_secs_f64();
		let rate = self.n as f64 / dt;
		println!("{:6.0}% [{:6.2}/s]", 100.0, rate);
	}
}
