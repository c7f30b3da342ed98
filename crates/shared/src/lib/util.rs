pub fn usize_to_u64(val: usize) -> u64 {
    let result = val.try_into();
    match result {
        Ok(v) => v,
        // Intentional panic - if we're getting here, something is wrong with either code or the
        // machine architecture - application won't be able to continue successfully
        Err(error) => panic!("Couldn't convert usize to u64: {error:?}"),
    }
}

pub fn strip_0x_prefix(value: &str) -> &str {
    value.strip_prefix("0x").unwrap_or(value)
}
