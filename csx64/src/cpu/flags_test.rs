use super::*;

#[test]
fn new_flags_has_bit_one_set() {
    assert_eq!(RFlags::new().0, 2);
}

#[test]
fn individual_bits_round_trip() {
    let mut f = RFlags::new();
    f.set_cf(true);
    f.set_of(true);
    f.set_fsf(true);
    assert!(f.cf());
    assert!(f.of());
    assert!(f.fsf());
    assert!(!f.zf());
    f.set_cf(false);
    assert!(!f.cf());
    assert!(f.of());
}

#[test]
fn pf_is_even_parity_of_low_byte() {
    let mut f = RFlags::new();
    f.update_pf(0b0000_0011); // two set bits -> even parity
    assert!(f.pf());
    f.update_pf(0b0000_0001); // one set bit -> odd parity
    assert!(!f.pf());
}

#[test]
fn zf_sf_use_truncated_width() {
    let mut f = RFlags::new();
    f.update_zf_sf(0x1_0000_0000, 2); // truncates to 0 at dword width
    assert!(f.zf());
    assert!(!f.sf());
    f.update_zf_sf(0x80, 0);
    assert!(!f.zf());
    assert!(f.sf());
}

#[test]
fn condition_codes_match_standard_semantics() {
    let mut f = RFlags::new();
    f.set_zf(true);
    assert!(Condition::Z.evaluate(f));
    assert!(!Condition::Nz.evaluate(f));

    let mut f2 = RFlags::new();
    f2.set_sf(true);
    f2.set_of(false);
    assert!(Condition::L.evaluate(f2));
    assert!(!Condition::G.evaluate(f2));
}

#[test]
fn condition_code_round_trips_through_byte() {
    for c in Condition::ALL.iter().copied() {
        assert_eq!(Condition::from_code(c.code()), Some(c));
    }
}
