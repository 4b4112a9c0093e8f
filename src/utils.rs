pub mod timer;

#[cfg(test)]
pub mod test_helpers;
