pub mod ids;
pub mod logging;
#[cfg(test)]
pub mod test_utils;
