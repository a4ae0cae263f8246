/// Computes the RFC 1071 internet checksum over `data`.
///
/// Words are read big-endian. An odd trailing byte is the high byte of a zero-padded word.
/// Running the function over a buffer that already carries a correct checksum yields 0.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let words = data.chunks_exact(2);
    let odd = words.remainder().first().copied();

    let mut sum = words.fold(0u64, |acc, word| {
        acc + u64::from(u16::from_be_bytes([word[0], word[1]]))
    });
    if let Some(last) = odd {
        sum += u64::from(last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xFFFF);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1071_example() {
        // Worked example from RFC 1071 section 3.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), !0xddf2);
    }

    #[test]
    fn large_buffer() {
        // 2^17 words of 0xffff overflow a 32bit accumulator
        let data = vec![0xff; 1 << 18];
        assert_eq!(internet_checksum(&data), 0);

        let mut data = vec![0x12; 1 << 18];
        data.extend_from_slice(&[0, 0]);
        let checksum = internet_checksum(&data);
        let len = data.len();
        data[len - 2..].copy_from_slice(&checksum.to_be_bytes());
        assert_eq!(internet_checksum(&data), 0);
    }

    #[test]
    fn odd_length_pads_low_byte() {
        assert_eq!(internet_checksum(&[0x12]), !0x1200);
        assert_eq!(
            internet_checksum(&[0x00, 0x01, 0x02]),
            internet_checksum(&[0x00, 0x01, 0x02, 0x00])
        );
    }

    #[test]
    fn empty_buffer() {
        assert_eq!(internet_checksum(&[]), 0xFFFF);
    }

    #[test]
    fn ipv4_header_checksums_to_zero() {
        let header = [
            0x45, 0x00, 0x00, 0x14, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0xc0, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        assert_eq!(internet_checksum(&header), 0);
    }

    #[test]
    fn all_ones_fold_to_zero() {
        let data = vec![0xff; 64];
        assert_eq!(internet_checksum(&data), 0);
    }
}
