/// Block interleaver: items are written row-wise in blocks of `block_size`
/// and read column-wise. The tail that does not fill a whole block passes
/// through unchanged.
pub fn interleave<T: Copy>(input: &[T], output: &mut [T], block_size: usize) {
    let n_items = input.len();
    let n_blocks = n_items / block_size;

    for i in 0..n_blocks {
        for j in 0..block_size {
            output[j * n_blocks + i] = input[i * block_size + j];
        }
    }
    for i in n_blocks * block_size..n_items {
        output[i] = input[i];
    }
}

pub fn deinterleave<T: Copy>(input: &[T], output: &mut [T], block_size: usize) {
    let n_items = input.len();
    let n_blocks = n_items / block_size;

    for i in 0..n_blocks {
        for j in 0..block_size {
            output[i * block_size + j] = input[j * n_blocks + i];
        }
    }
    for i in n_blocks * block_size..n_items {
        output[i] = input[i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deinterleave_inverts_interleave() {
        let input: Vec<u32> = (0..1600).collect();
        let mut shuffled = vec![0u32; input.len()];
        let mut restored = vec![0u32; input.len()];

        interleave(&input, &mut shuffled, 160);
        assert_ne!(shuffled, input);
        deinterleave(&shuffled, &mut restored, 160);
        assert_eq!(restored, input);
    }

    #[test]
    fn ragged_tail_passes_through() {
        let input: Vec<u32> = (0..17).collect();
        let mut shuffled = vec![0u32; input.len()];
        interleave(&input, &mut shuffled, 5);
        assert_eq!(&shuffled[15..], &input[15..]);

        let mut restored = vec![0u32; input.len()];
        deinterleave(&shuffled, &mut restored, 5);
        assert_eq!(restored, input);
    }

    #[test]
    fn adjacent_inputs_are_separated() {
        let input: Vec<u32> = (0..100).collect();
        let mut shuffled = vec![0u32; input.len()];
        interleave(&input, &mut shuffled, 10);
        let pos_a = shuffled.iter().position(|&v| v == 0).unwrap();
        let pos_b = shuffled.iter().position(|&v| v == 1).unwrap();
        assert!(pos_a.abs_diff(pos_b) >= 10);
    }
}
