use tracing::info_span;

mod prefix_sum;

pub use prefix_sum::prefix_sum;

/// Bits consumed per scatter pass.
pub const BITS_PER_PASS: u32 = 4;
pub const BIN_COUNT: usize = 1 << BITS_PER_PASS;

/// Stable LSD radix sort of `input_keys`, carrying `input_values` along.
///
/// Only the low `sorting_bits` of each key take part in the ordering, so callers
/// that quantize their keys (eg. depth buckets) can skip the upper passes.
pub fn radix_argsort(
    input_keys: &[u32],
    input_values: &[u32],
    sorting_bits: u32,
) -> (Vec<u32>, Vec<u32>) {
    assert_eq!(input_keys.len(), input_values.len());
    assert!(sorting_bits <= 32);

    let _span = info_span!("Radix sort", n = input_keys.len()).entered();

    let mut cur_keys = input_keys.to_vec();
    let mut cur_vals = input_values.to_vec();

    if cur_keys.len() < 2 {
        return (cur_keys, cur_vals);
    }

    let mut out_keys = vec![0u32; cur_keys.len()];
    let mut out_vals = vec![0u32; cur_vals.len()];

    for pass in 0..sorting_bits.div_ceil(BITS_PER_PASS) {
        let shift = pass * BITS_PER_PASS;

        let mut counts = [0u32; BIN_COUNT];
        for &key in &cur_keys {
            counts[digit(key, shift)] += 1;
        }

        // Every key lands in the same bin, this pass would be a no-op copy.
        if counts.iter().any(|&c| c as usize == cur_keys.len()) {
            continue;
        }

        let scanned = prefix_sum(&counts);
        let mut offsets: Vec<u32> = scanned.iter().zip(counts).map(|(s, c)| s - c).collect();

        for (&key, &val) in cur_keys.iter().zip(&cur_vals) {
            let slot = &mut offsets[digit(key, shift)];
            out_keys[*slot as usize] = key;
            out_vals[*slot as usize] = val;
            *slot += 1;
        }

        std::mem::swap(&mut cur_keys, &mut out_keys);
        std::mem::swap(&mut cur_vals, &mut out_vals);
    }

    (cur_keys, cur_vals)
}

#[inline]
fn digit(key: u32, shift: u32) -> usize {
    ((key >> shift) as usize) & (BIN_COUNT - 1)
}

#[cfg(test)]
mod tests {
    use crate::radix_argsort;
    use rand::Rng;

    pub fn argsort<T: Ord>(data: &[T]) -> Vec<usize> {
        let mut indices = (0..data.len()).collect::<Vec<_>>();
        indices.sort_by_key(|&i| &data[i]);
        indices
    }

    #[test]
    fn test_sorting() {
        for i in 0..128u32 {
            let keys_inp = [
                5 + i * 4,
                i,
                6,
                123,
                74657,
                123,
                999,
                2u32.pow(24) + 123,
                6,
                7,
                8,
                0,
                i * 2,
                16 + i,
                128 * i,
            ];

            let values_inp: Vec<_> = keys_inp.iter().copied().map(|x| x * 2 + 5).collect();

            let (ret_keys, ret_values) = radix_argsort(&keys_inp, &values_inp, 32);

            let inds = argsort(&keys_inp);
            let ref_keys: Vec<u32> = inds.iter().map(|&i| keys_inp[i]).collect();
            let ref_values: Vec<u32> = inds.iter().map(|&i| values_inp[i]).collect();

            assert_eq!(ret_keys, ref_keys);
            assert_eq!(ret_values, ref_values);
        }
    }

    #[test]
    fn test_sorting_big() {
        // Simulate some data as one might find for a bunch of gaussians.
        let mut rng = rand::thread_rng();
        let mut keys_inp = Vec::new();
        for i in 0..10000u32 {
            let start = rng.gen_range(i..i + 150);
            let end = rng.gen_range(start..start + 250);

            for j in start..end {
                if rng.gen::<f32>() < 0.5 {
                    keys_inp.push(j);
                }
            }
        }

        let values_inp: Vec<_> = (0..keys_inp.len() as u32).collect();
        let (ret_keys, ret_values) = radix_argsort(&keys_inp, &values_inp, 32);

        // Stable: equal keys keep their input order, so the index argsort matches exactly.
        let inds = argsort(&keys_inp);
        let ref_keys: Vec<u32> = inds.iter().map(|&i| keys_inp[i]).collect();
        let ref_values: Vec<u32> = inds.iter().map(|&i| i as u32).collect();

        assert_eq!(ret_keys, ref_keys);
        assert_eq!(ret_values, ref_values);
    }

    #[test]
    fn test_sorting_low_bits_only() {
        let keys = [0xF0u32, 0x03, 0x01, 0xFF02];
        let values = [0u32, 1, 2, 3];
        let (keys, values) = radix_argsort(&keys, &values, 8);
        // 0xFF02 is ordered by its low byte only.
        assert_eq!(keys, [0x01, 0xFF02, 0x03, 0xF0]);
        assert_eq!(values, [2, 3, 1, 0]);
    }

    #[test]
    fn test_sorting_trivial() {
        let (k, v) = radix_argsort(&[], &[], 32);
        assert!(k.is_empty() && v.is_empty());
        let (k, v) = radix_argsort(&[7], &[3], 32);
        assert_eq!((k, v), (vec![7], vec![3]));
    }
}
