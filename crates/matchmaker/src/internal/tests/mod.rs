#[cfg(test)]
mod test_matching;

pub mod utils;
