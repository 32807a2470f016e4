mod common;

use common::{Inode, Machine, va};
use keos::{KernelError, addressing::PAGE_SIZE};
use keos_vm::{
    Page, PageKind, VmType,
    anon::AnonPage,
    uninit::{Initializer, LazyLoad},
};
use proptest::prelude::*;
use std::sync::Arc;

const BASE: usize = 0x1000_0000;

#[test]
fn pages_are_found_by_any_address_within() {
    let machine = Machine::new(4, 4);
    let mut p = machine.process();
    p.mm.alloc_page(VmType::Anon, va(BASE), true).unwrap();

    let page = p.mm.spt().find(va(BASE + 0x123)).unwrap().clone();
    assert!(Arc::ptr_eq(&page, p.mm.spt().find(va(BASE)).unwrap()));
    assert!(p.mm.spt().find(va(BASE + PAGE_SIZE)).is_none());
    assert!(p.mm.spt().find(va(BASE - 1)).is_none());

    let guard = page.lock();
    let (page_va, ty, resident) = (guard.va(), guard.vm_type(), guard.is_resident());
    guard.unlock();
    assert_eq!(page_va, va(BASE));
    assert_eq!(ty, VmType::Anon);
    assert!(!resident);
}

#[test]
fn duplicate_insert_is_rejected() {
    let machine = Machine::new(4, 4);
    let mut p = machine.process();
    p.mm.alloc_page(VmType::Anon, va(BASE), false).unwrap();
    assert_eq!(
        p.mm.alloc_page(VmType::Anon, va(BASE + 8), true),
        Err(KernelError::InvalidArgument)
    );

    // The first descriptor survives.
    let page = p.mm.spt().find(va(BASE)).unwrap();
    let guard = page.lock();
    let writable = guard.writable();
    guard.unlock();
    assert!(!writable);
    assert_eq!(p.mm.spt().len(), 1);
}

#[test]
fn insert_through_the_table() {
    let machine = Machine::new(4, 4);
    let p = machine.process();
    let pt = p.mm.page_table().clone();
    let page = Page::new(va(BASE + 0x10), true, PageKind::Anon(AnonPage::new()), pt);
    assert_eq!(page.va(), va(BASE));

    let mut spt = keos_vm::spt::SupplementalPageTable::new();
    assert!(spt.is_empty());
    spt.insert(page).unwrap();
    assert_eq!(spt.len(), 1);
    assert!(spt.find(va(BASE + PAGE_SIZE - 1)).is_some());
    spt.remove(va(BASE + 4), &machine.vm).unwrap();
    assert!(spt.is_empty());
}

#[test]
fn remove_of_missing_page_fails() {
    let machine = Machine::new(4, 4);
    let mut spt = keos_vm::spt::SupplementalPageTable::new();
    assert_eq!(spt.remove(va(BASE), &machine.vm), Err(KernelError::NoSuchEntry));
}

#[test]
fn remove_releases_frame_and_mapping() {
    let machine = Machine::new(4, 4);
    let mut p = machine.process();
    p.mm.alloc_page(VmType::Anon, va(BASE), true).unwrap();
    p.write(BASE, b"hello").unwrap();
    assert_eq!(machine.vm.resident_frames(), 1);
    assert_eq!(p.pt.len(), 1);

    p.mm.remove_page(va(BASE + 8)).unwrap();
    assert!(p.mm.spt().is_empty());
    assert_eq!(p.pt.len(), 0);
    assert_eq!(machine.vm.resident_frames(), 0);
    assert_eq!(machine.pool.outstanding(), 0);
    assert_eq!(p.mm.remove_page(va(BASE)), Err(KernelError::NoSuchEntry));
}

#[test]
fn kernel_addresses_are_rejected() {
    let machine = Machine::new(4, 4);
    let mut p = machine.process();
    assert_eq!(
        p.mm.alloc_page(VmType::Anon, va(0xffff_8000_0000_0000), true),
        Err(KernelError::BadAddress)
    );
    assert!(p.mm.spt().is_empty());
}

#[test]
fn initializer_must_match_target() {
    let machine = Machine::new(4, 4);
    let mut p = machine.process();
    let inode = Inode::new(vec![1; PAGE_SIZE]);
    let init = Initializer::MappedFile {
        load: LazyLoad::new(inode.open(), 0, PAGE_SIZE),
        writeback: inode.open(),
        region: None,
    };
    assert_eq!(
        p.mm.alloc_page_with_initializer(VmType::Anon, va(BASE), true, init),
        Err(KernelError::InvalidArgument)
    );
    assert_eq!(
        p.mm.alloc_page_with_initializer(VmType::File, va(BASE), true, Initializer::Zero),
        Err(KernelError::InvalidArgument)
    );
    assert_eq!(inode.handles(), 0);
}

#[test]
fn claim_page_makes_page_resident() {
    let machine = Machine::new(4, 4);
    let mut p = machine.process();
    p.mm.alloc_page(VmType::Anon, va(BASE), true).unwrap();
    p.mm.claim_page(va(BASE + 0x800)).unwrap();
    assert!(p.is_resident(BASE));
    assert_eq!(p.read(BASE, 16).unwrap(), vec![0; 16]);
    assert_eq!(p.mm.claim_page(va(BASE + PAGE_SIZE)), Err(KernelError::BadAddress));
}

#[test]
fn access_ok_checks_every_page() {
    let machine = Machine::new(4, 4);
    let mut p = machine.process();
    p.mm.alloc_page(VmType::Anon, va(BASE), true).unwrap();
    p.mm.alloc_page(VmType::Anon, va(BASE + PAGE_SIZE), false).unwrap();

    assert!(p.mm.access_ok(va(BASE)..va(BASE + 2 * PAGE_SIZE), false));
    assert!(p.mm.access_ok(va(BASE + 8)..va(BASE + 16), true));
    assert!(!p.mm.access_ok(va(BASE)..va(BASE + PAGE_SIZE + 1), true));
    assert!(!p.mm.access_ok(va(BASE)..va(BASE + 2 * PAGE_SIZE + 1), false));
    assert!(!p.mm.access_ok(va(0)..va(8), false));
    // Nothing was populated.
    assert_eq!(machine.vm.resident_frames(), 0);
}

proptest! {
    #[test]
    fn find_rounds_down_to_the_page(page in 1usize..0x1000, offset in 0usize..PAGE_SIZE) {
        let machine = Machine::new(1, 1);
        let mut p = machine.process();
        let base = page * PAGE_SIZE;
        p.mm.alloc_page(VmType::Anon, va(base), true).unwrap();
        let found = p.mm.spt().find(va(base + offset)).unwrap();
        let guard = found.lock();
        let page_va = guard.va();
        guard.unlock();
        prop_assert_eq!(page_va, va(base));
        prop_assert!(p.mm.spt().find(va(base + PAGE_SIZE + offset)).is_none());
    }
}
