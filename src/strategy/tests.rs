extern crate std;

use quickcheck_macros::quickcheck;
use std::prelude::v1::*;

use super::*;
use crate::tests::{preallocate, Align, State, SIZE_REMAINING};

type Region<'a> = BlockRegion<'a, u16>;

const HEADER: usize = Region::HEADER_SIZE;

fn layout(size: usize, align: usize) -> Layout {
    Layout::from_size_align(size, align).unwrap()
}

/// Free blocks with inner sizes 128, 16, and 144, separated by used blocks
const PATTERN: [(usize, State); 6] = [
    (HEADER + 128, State::Free),
    (16, State::Used),
    (HEADER + 16, State::Free),
    (16, State::Used),
    (HEADER + 144, State::Free),
    (SIZE_REMAINING, State::Used),
];

#[test]
fn choose_small() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut pool = Align::<[_; 1024]>::uninit();
    let (mut region, _) = Region::init(&mut pool.0).unwrap();
    let blocks = preallocate(&mut region, &PATTERN);
    log::trace!("region = {:?}", region);

    let request = layout(16, 1);
    assert_eq!(
        FirstFit.choose_block(&region, request),
        Some((blocks[0], Carve::Front))
    );
    assert_eq!(
        LastFit.choose_block(&region, request),
        Some((blocks[4], Carve::Back))
    );
    assert_eq!(
        BestFit.choose_block(&region, request),
        Some((blocks[2], Carve::Front))
    );
    assert_eq!(
        WorstFit.choose_block(&region, request),
        Some((blocks[4], Carve::Front))
    );
}

#[test]
fn choose_large() {
    let mut pool = Align::<[_; 1024]>::uninit();
    let (mut region, _) = Region::init(&mut pool.0).unwrap();
    let blocks = preallocate(&mut region, &PATTERN);

    // Only the last free block is large enough
    let request = layout(130, 1);
    assert_eq!(
        FirstFit.choose_block(&region, request),
        Some((blocks[4], Carve::Front))
    );
    assert_eq!(
        LastFit.choose_block(&region, request),
        Some((blocks[4], Carve::Back))
    );
    assert_eq!(
        BestFit.choose_block(&region, request),
        Some((blocks[4], Carve::Front))
    );
    assert_eq!(
        WorstFit.choose_block(&region, request),
        Some((blocks[4], Carve::Front))
    );
}

#[test]
fn choose_none() {
    let mut pool = Align::<[_; 1024]>::uninit();
    let (mut region, _) = Region::init(&mut pool.0).unwrap();
    preallocate(&mut region, &PATTERN);

    let request = layout(145, 1);
    assert_eq!(FirstFit.choose_block(&region, request), None);
    assert_eq!(LastFit.choose_block(&region, request), None);
    assert_eq!(BestFit.choose_block(&region, request), None);
    assert_eq!(WorstFit.choose_block(&region, request), None);
    assert_eq!(DualFirstFit::new(0).choose_block(&region, request), None);
    assert_eq!(DualFirstFit::new(1024).choose_block(&region, request), None);
}

#[test]
fn choose_alignment() {
    let mut pool = Align::<[_; 1024]>::uninit();
    let (mut region, _) = Region::init(&mut pool.0).unwrap();
    let blocks = preallocate(
        &mut region,
        &[
            (64, State::Used),
            // Usable space at 72, too far from 128 for a 64-byte alignment
            (64, State::Free),
            (64, State::Used),
            (SIZE_REMAINING, State::Free),
        ],
    );

    let request = layout(16, 32);
    assert_eq!(
        FirstFit.choose_block(&region, request),
        Some((blocks[1], Carve::Front))
    );
    let request = layout(16, 64);
    assert_eq!(
        FirstFit.choose_block(&region, request),
        Some((blocks[3], Carve::Front))
    );
    assert_eq!(
        BestFit.choose_block(&region, request),
        Some((blocks[3], Carve::Front))
    );
}

#[test]
fn ties_go_to_lowest_address() {
    let mut pool = Align::<[_; 1024]>::uninit();
    let (mut region, _) = Region::init(&mut pool.0).unwrap();
    let blocks = preallocate(
        &mut region,
        &[
            (64, State::Free),
            (64, State::Used),
            (64, State::Free),
            (SIZE_REMAINING, State::Used),
        ],
    );

    let request = layout(8, 1);
    assert_eq!(
        BestFit.choose_block(&region, request),
        Some((blocks[0], Carve::Front))
    );
    assert_eq!(
        WorstFit.choose_block(&region, request),
        Some((blocks[0], Carve::Front))
    );
}

#[test]
fn dual_first_fit_threshold() {
    let mut pool = Align::<[_; 1024]>::uninit();
    let (mut region, _) = Region::init(&mut pool.0).unwrap();
    let blocks = preallocate(&mut region, &PATTERN);

    let mut strategy = DualFirstFit::new(64);
    assert_eq!(strategy.threshold(), 64);

    // Small requests go to the front
    assert_eq!(
        strategy.choose_block(&region, layout(16, 1)),
        Some((blocks[0], Carve::Front))
    );
    // Large requests go to the back
    assert_eq!(
        strategy.choose_block(&region, layout(64, 1)),
        Some((blocks[4], Carve::Back))
    );

    strategy.set_threshold(16);
    assert_eq!(
        strategy.choose_block(&region, layout(16, 1)),
        Some((blocks[4], Carve::Back))
    );
    assert_eq!(
        strategy.choose_block(&region, layout(15, 1)),
        Some((blocks[0], Carve::Front))
    );
}

#[test]
fn const_default() {
    use const_default1::ConstDefault;
    assert_eq!(DualFirstFit::DEFAULT, DualFirstFit::default());
    assert_eq!(DualFirstFit::DEFAULT.threshold(), 0);
    assert_eq!(BestFit::DEFAULT, BestFit);
}

/// Build a region of alternating free and used blocks from `sizes` and
/// return the inner sizes of the free blocks that can hold `request`.
fn random_region<'a>(
    pool: &'a mut Align<[core::mem::MaybeUninit<u8>; 4096]>,
    sizes: &[u8],
    request: Layout,
) -> Option<(Region<'a>, Vec<(Block, usize)>)> {
    let (mut region, _) = Region::init(&mut pool.0).unwrap();

    let mut pattern = Vec::new();
    let mut total = 0;
    for (i, &size) in sizes.iter().enumerate() {
        let outer_size = HEADER + (size as usize % 24 + 1) * 8;
        if total + outer_size + 64 > region.len() {
            break;
        }
        let state = if i % 2 == 0 { State::Free } else { State::Used };
        pattern.push((outer_size, state));
        total += outer_size;
    }
    if pattern.len() % 2 == 0 {
        pattern.push((SIZE_REMAINING, State::Free));
    } else {
        pattern.push((SIZE_REMAINING, State::Used));
    }
    let blocks = preallocate(&mut region, &pattern);

    let fitting: Vec<_> = blocks
        .iter()
        .map(|&b| region.info(b).unwrap())
        .filter(|b| b.is_free() && region.can_alloc(b.block(), request).is_ok())
        .map(|b| (b.block(), b.inner_size()))
        .collect();
    if fitting.is_empty() {
        return None;
    }
    Some((region, fitting))
}

#[quickcheck]
fn best_fit_is_minimal(sizes: Vec<u8>, size: u8) {
    let request = layout(size as usize, 1);
    let mut pool = Align::<[_; 4096]>::uninit();
    let Some((region, fitting)) = random_region(&mut pool, &sizes, request) else {
        return;
    };

    let (chosen, carve) = BestFit.choose_block(&region, request).unwrap();
    assert_eq!(carve, Carve::Front);
    let min = fitting.iter().map(|&(_, inner)| inner).min().unwrap();
    assert_eq!(region.inner_size(chosen), min);
    // ...and the lowest such address
    let first = fitting.iter().find(|&&(_, inner)| inner == min).unwrap().0;
    assert_eq!(chosen, first);
}

#[quickcheck]
fn worst_fit_is_maximal(sizes: Vec<u8>, size: u8) {
    let request = layout(size as usize, 1);
    let mut pool = Align::<[_; 4096]>::uninit();
    let Some((region, fitting)) = random_region(&mut pool, &sizes, request) else {
        return;
    };

    let (chosen, _) = WorstFit.choose_block(&region, request).unwrap();
    let max = fitting.iter().map(|&(_, inner)| inner).max().unwrap();
    assert_eq!(region.inner_size(chosen), max);
}

#[quickcheck]
fn first_and_last_fit_are_extremes(sizes: Vec<u8>, size: u8) {
    let request = layout(size as usize, 1);
    let mut pool = Align::<[_; 4096]>::uninit();
    let Some((region, fitting)) = random_region(&mut pool, &sizes, request) else {
        return;
    };

    assert_eq!(
        FirstFit.choose_block(&region, request),
        Some((fitting[0].0, Carve::Front))
    );
    assert_eq!(
        LastFit.choose_block(&region, request),
        Some((fitting[fitting.len() - 1].0, Carve::Back))
    );
}
