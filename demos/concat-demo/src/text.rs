//! Hookable string helpers.

pub fn concat(a: String, b: String) -> String {
    let mut out = a;
    out.push_str(&b);
    out
}

pub struct Counter {
    total: i64,
}

impl Counter {
    pub fn new() -> Self {
        Self { total: 0 }
    }

    pub fn add(&mut self, amount: i64) -> i64 {
        self.total += amount;
        self.total
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}
