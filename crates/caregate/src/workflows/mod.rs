pub mod compliance;
pub mod verification;

#[cfg(test)]
pub(crate) mod test_support;
