/// Inclusive scan: `out[i] = input[0] + .. + input[i]`.
pub fn prefix_sum(input: &[u32]) -> Vec<u32> {
    input
        .iter()
        .scan(0u32, |acc, &x| {
            *acc += x;
            Some(*acc)
        })
        .collect()
}
