/// Move selection cursor one item up.
pub fn select_prev(selected: usize) -> usize {
    selected.saturating_sub(1)
}

/// Move selection cursor one item down if another item exists.
pub fn select_next(selected: usize, item_count: usize) -> usize {
    if selected + 1 < item_count {
        selected + 1
    } else {
        selected
    }
}

/// Next decimal digit, wrapping 9 -> 0.
pub fn digit_up(digit: u8) -> u8 {
    (digit + 1) % 10
}

/// Previous decimal digit, wrapping 0 -> 9.
pub fn digit_down(digit: u8) -> u8 {
    if digit == 0 {
        9
    } else {
        digit - 1
    }
}
