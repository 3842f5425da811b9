use super::frame::FrameSource;
use super::mmu::Mmu;
use super::mock::{MockFile, MockFrames, MockMmu, MockPlatform, MockSwapDisk};
use super::{AddressSpace, FaultOutcome, MmapError, PageInit, PageState, VirtAddr, VirtualMemory};
use crate::config::{PAGE_SIZE, SECTORS_PER_PAGE, STACK_LIMIT, USER_STACK_TOP};
use crate::thread::Tid;

fn fresh_vm(frames: usize, swap_pages: usize) -> VirtualMemory<MockPlatform> {
    VirtualMemory::new(MockFrames::new(frames), MockSwapDisk::new(swap_pages * SECTORS_PER_PAGE))
}

fn with_empty_stack(vm: &mut VirtualMemory<MockPlatform>, pid: Tid) {
    vm.create_address_space(pid, AddressSpace::new(MockMmu::default(), VirtAddr::new(USER_STACK_TOP)));
}

#[test]
fn stack_grows_one_page_on_a_plausible_fault() {
    let mut vm = fresh_vm(4, 0);
    let pid = Tid(1);
    with_empty_stack(&mut vm, pid);

    let fault_va = USER_STACK_TOP - PAGE_SIZE;
    let outcome = vm.handle_fault(pid, VirtAddr::new(fault_va), true, fault_va);

    assert_eq!(outcome, FaultOutcome::StackGrown);
    let space = vm.address_space(pid).unwrap();
    assert_eq!(space.stack_bottom, VirtAddr::new(fault_va));
    let page = space.pages.get(&VirtAddr::new(fault_va)).unwrap();
    assert!(page.frame.is_some());
    assert!(page.is_stack);
    assert!(space.mmu.is_mapped(VirtAddr::new(fault_va)));
}

#[test]
fn fault_far_below_the_stack_limit_is_a_segfault() {
    let mut vm = fresh_vm(4, 0);
    let pid = Tid(1);
    with_empty_stack(&mut vm, pid);

    let fault_va = USER_STACK_TOP - STACK_LIMIT - PAGE_SIZE;
    let outcome = vm.handle_fault(pid, VirtAddr::new(fault_va), true, fault_va);

    assert_eq!(outcome, FaultOutcome::SegmentationFault);
    assert!(vm.address_space(pid).unwrap().pages.is_empty());
}

#[test]
fn mmap_write_back_reaches_the_file_on_munmap() {
    let mut vm = fresh_vm(4, 0);
    let pid = Tid(1);
    with_empty_stack(&mut vm, pid);

    let file = MockFile::new(alloc::vec![0xAAu8; PAGE_SIZE]);
    let addr = VirtAddr::new(0x1000);
    vm.mmap(pid, addr, PAGE_SIZE, true, file.clone(), 0).unwrap();

    let outcome = vm.handle_fault(pid, addr, false, 0);
    assert_eq!(outcome, FaultOutcome::Handled);
    assert!(vm.address_space(pid).unwrap().pages.get(&addr).unwrap().frame.is_some());

    let frame = vm.address_space(pid).unwrap().pages.get(&addr).unwrap().frame.unwrap();
    vm.frames.bytes_mut(frame).fill(0xBB);
    vm.address_space_mut(pid).unwrap().mmu.simulate_write(addr);

    vm.munmap(pid, addr).unwrap();

    assert_eq!(file.snapshot(), alloc::vec![0xBBu8; PAGE_SIZE]);
    assert!(!vm.address_space(pid).unwrap().mmu.is_mapped(addr));
    assert!(vm.address_space(pid).unwrap().pages.get(&addr).is_none());
}

#[test]
fn mmap_rejects_a_second_mapping_over_the_stack() {
    let mut vm = fresh_vm(4, 0);
    let pid = Tid(1);
    vm.create_address_space(pid, AddressSpace::new(MockMmu::default(), VirtAddr::new(0x2000)));
    let file = MockFile::new(alloc::vec![0u8; PAGE_SIZE]);
    let err = vm.mmap(pid, VirtAddr::new(0x2000), PAGE_SIZE, true, file, 0).unwrap_err();
    assert!(matches!(err, MmapError::OverlapsStackOrExecutable));
}

#[test]
fn write_to_a_read_only_mapping_is_write_protected() {
    let mut vm = fresh_vm(4, 0);
    let pid = Tid(1);
    with_empty_stack(&mut vm, pid);

    let file = MockFile::new(alloc::vec![0u8; PAGE_SIZE]);
    let addr = VirtAddr::new(0x1000);
    vm.mmap(pid, addr, PAGE_SIZE, false, file, 0).unwrap();
    assert_eq!(vm.handle_fault(pid, addr, false, 0), FaultOutcome::Handled);
    assert_eq!(vm.handle_fault(pid, addr, true, 0), FaultOutcome::WriteProtected);
}

#[test]
fn fork_gives_a_resident_anon_page_its_own_frame_that_can_diverge() {
    let mut vm = fresh_vm(4, 0);
    let parent = Tid(1);
    let child = Tid(2);
    with_empty_stack(&mut vm, parent);

    let va = VirtAddr::new(0x1000);
    vm.alloc_page(parent, va, true, PageInit::AnonZeroed).unwrap();
    assert_eq!(vm.handle_fault(parent, va, true, 0), FaultOutcome::Handled);

    let parent_frame = vm.address_space(parent).unwrap().pages.get(&va).unwrap().frame.unwrap();
    vm.frames.bytes_mut(parent_frame)[0] = 0xAA;

    vm.fork_address_space(parent, child, MockMmu::default()).unwrap();

    let child_frame = vm.address_space(child).unwrap().pages.get(&va).unwrap().frame.unwrap();
    assert_ne!(child_frame, parent_frame, "child must get its own frame, not alias the parent's");
    assert_eq!(vm.frames.bytes(child_frame)[0], 0xAA, "fork must copy the parent's bytes");

    vm.frames.bytes_mut(child_frame)[0] = 0xBB;
    assert_eq!(vm.frames.bytes(parent_frame)[0], 0xAA, "writing the child's copy must not affect the parent's");
}

#[test]
fn fork_shares_a_swapped_out_anon_page_instead_of_copying_it() {
    let mut vm = fresh_vm(4, 4);
    let parent = Tid(1);
    let child = Tid(2);
    with_empty_stack(&mut vm, parent);

    let va = VirtAddr::new(0x1000);
    vm.alloc_page(parent, va, true, PageInit::AnonZeroed).unwrap();
    let slot = vm.swap.swap_out(&[0x42u8; PAGE_SIZE]).unwrap();
    {
        let space = vm.address_space_mut(parent).unwrap();
        let page = space.pages.get_mut(&va).unwrap();
        page.frame = None;
        page.state = PageState::Anon { swap_slot: Some(slot) };
    }

    vm.fork_address_space(parent, child, MockMmu::default()).unwrap();
    let child_space = vm.address_space(child).unwrap();
    let child_page = child_space.pages.get(&va).unwrap();
    match &child_page.state {
        PageState::Anon { swap_slot: Some(s) } => assert_eq!(*s, slot),
        _ => panic!("forked swapped-out page should stay swapped, sharing the same slot"),
    }

    vm.destroy_address_space(parent);

    let dummy = vm.swap.swap_out(&[0u8; PAGE_SIZE]).unwrap();
    assert_ne!(dummy, slot, "the slot is still shared with the child and must not be handed out");

    let outcome = vm.handle_fault(child, va, false, 0);
    assert_eq!(outcome, FaultOutcome::Handled);
    let frame = vm.address_space(child).unwrap().pages.get(&va).unwrap().frame.unwrap();
    assert_eq!(vm.frames.bytes(frame)[0], 0x42, "child must still read back the data written before sharing");
}
