//! In-memory collaborators for exercising the paging engine on the host.
#![allow(dead_code)]

use keos::{
    KernelError,
    addressing::{Kva, PAGE_SIZE, Pa, Va},
    fs::{Disk, RegularFile, SECTOR_SIZE, Sector, traits},
    mm::{
        PageAllocator,
        page_table::{PageTable, PageTableMappingError, Permission, PteFlags},
    },
    task::{PFErrorCode, Thread},
};
use keos_vm::{MmStruct, PageFaultReason, Vm, VmConfig};
use std::{
    alloc::{Layout, alloc_zeroed, dealloc},
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

pub const STACK_TOP: usize = VmConfig::DEFAULT_STACK_TOP;

pub fn va(addr: usize) -> Va {
    Va::new(addr).unwrap()
}

/// Physical memory with a fixed number of frames.
pub struct PagePool {
    capacity: usize,
    outstanding: AtomicUsize,
}

impl PagePool {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            outstanding: AtomicUsize::new(0),
        })
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    fn layout() -> Layout {
        Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).unwrap()
    }
}

unsafe impl PageAllocator for PagePool {
    fn get_zeroed_page(&self) -> Option<Kva> {
        self.outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .ok()?;
        let ptr = unsafe { alloc_zeroed(Self::layout()) };
        Kva::new(ptr as usize)
    }

    fn free_page(&self, kva: Kva) {
        unsafe { dealloc(kva.into_usize() as *mut u8, Self::layout()) };
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A RAM disk.
#[derive(Clone)]
pub struct MemDisk {
    sectors: Arc<Mutex<Vec<[u8; SECTOR_SIZE]>>>,
    pub fail_writes: Arc<AtomicBool>,
}

impl MemDisk {
    pub fn new(sectors: usize) -> Self {
        Self {
            sectors: Arc::new(Mutex::new(vec![[0; SECTOR_SIZE]; sectors])),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn sector(&self, sector: usize) -> [u8; SECTOR_SIZE] {
        self.sectors.lock().unwrap()[sector]
    }
}

impl traits::BlockDevice for MemDisk {
    fn read(&self, sector: Sector, buf: &mut [u8; 512]) -> Result<(), KernelError> {
        *buf = self.sectors.lock().unwrap()[sector.into_usize()];
        Ok(())
    }

    fn write(&self, sector: Sector, buf: &[u8; 512]) -> Result<(), KernelError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(KernelError::IOError);
        }
        self.sectors.lock().unwrap()[sector.into_usize()] = *buf;
        Ok(())
    }

    fn size(&self) -> usize {
        self.sectors.lock().unwrap().len()
    }
}

/// The file itself; every [`MemFile`] is a handle on one.
pub struct Inode {
    pub data: Mutex<Vec<u8>>,
    pub open_handles: AtomicUsize,
    pub writes: AtomicUsize,
}

impl Inode {
    pub fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(data),
            open_handles: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        })
    }

    pub fn open(self: &Arc<Self>) -> RegularFile {
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        RegularFile::new(MemFile {
            inode: self.clone(),
        })
    }

    pub fn handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

pub struct MemFile {
    inode: Arc<Inode>,
}

impl Drop for MemFile {
    fn drop(&mut self) {
        self.inode.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl traits::RegularFile for MemFile {
    fn size(&self) -> usize {
        self.inode.data.lock().unwrap().len()
    }

    fn read_at(&self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        let data = self.inode.data.lock().unwrap();
        let start = position.min(data.len());
        let end = (position + buf.len()).min(data.len());
        buf[..end - start].copy_from_slice(&data[start..end]);
        Ok(end - start)
    }

    fn write_at(&self, position: usize, buf: &[u8]) -> Result<usize, KernelError> {
        let mut data = self.inode.data.lock().unwrap();
        if data.len() < position + buf.len() {
            data.resize(position + buf.len(), 0);
        }
        data[position..position + buf.len()].copy_from_slice(buf);
        self.inode.writes.fetch_add(1, Ordering::SeqCst);
        Ok(buf.len())
    }

    fn reopen(&self) -> Result<RegularFile, KernelError> {
        Ok(self.inode.open())
    }
}

/// A software page table.
#[derive(Default)]
pub struct MockPageTable {
    entries: Mutex<BTreeMap<Va, (Pa, PteFlags)>>,
}

impl MockPageTable {
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Clears the accessed bit of every entry.
    pub fn age(&self) {
        for (_, flags) in self.entries.lock().unwrap().values_mut() {
            flags.remove(PteFlags::A);
        }
    }

    fn translate(&self, va: Va) -> Option<(Pa, PteFlags)> {
        self.entries.lock().unwrap().get(&va.page_down()).copied()
    }

    fn touch(&self, va: Va, write: bool) {
        if let Some((_, flags)) = self.entries.lock().unwrap().get_mut(&va.page_down()) {
            flags.insert(PteFlags::A);
            if write {
                flags.insert(PteFlags::D);
            }
        }
    }
}

impl PageTable for MockPageTable {
    fn get_page(&self, va: Va) -> Option<Pa> {
        self.translate(va).map(|(pa, _)| pa)
    }

    fn map(&self, va: Va, pa: Pa, perm: Permission) -> Result<(), PageTableMappingError> {
        if va.offset() != 0 || pa.offset() != 0 {
            return Err(PageTableMappingError::Unaligned);
        }
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&va) {
            return Err(PageTableMappingError::Duplicated);
        }
        entries.insert(va, (pa, perm.into_pte_flags()));
        Ok(())
    }

    fn unmap(&self, va: Va) -> Result<Pa, PageTableMappingError> {
        self.entries
            .lock()
            .unwrap()
            .remove(&va)
            .map(|(pa, _)| pa)
            .ok_or(PageTableMappingError::NotExist)
    }

    fn flags(&self, va: Va) -> Option<PteFlags> {
        self.translate(va).map(|(_, flags)| flags)
    }

    fn set_accessed(&self, va: Va, accessed: bool) {
        if let Some((_, flags)) = self.entries.lock().unwrap().get_mut(&va) {
            flags.set(PteFlags::A, accessed);
        }
    }

    fn set_dirty(&self, va: Va, dirty: bool) {
        if let Some((_, flags)) = self.entries.lock().unwrap().get_mut(&va) {
            flags.set(PteFlags::D, dirty);
        }
    }
}

/// A thread that records how it exited.
pub struct MockThread {
    pub kernel_rsp: Va,
    pub exit_status: Mutex<Option<i32>>,
}

impl MockThread {
    pub fn new(kernel_rsp: usize) -> Arc<Self> {
        Arc::new(Self {
            kernel_rsp: va(kernel_rsp),
            exit_status: Mutex::new(None),
        })
    }

    pub fn exit_status(&self) -> Option<i32> {
        *self.exit_status.lock().unwrap()
    }
}

impl Thread for MockThread {
    fn kernel_rsp(&self) -> Va {
        self.kernel_rsp
    }

    fn exit(&self, status: i32) {
        *self.exit_status.lock().unwrap() = Some(status);
    }
}

/// Physical memory, a swap disk and the subsystem running on them.
pub struct Machine {
    pub vm: Arc<Vm>,
    pub pool: Arc<PagePool>,
    pub swap_disk: MemDisk,
}

impl Machine {
    pub fn new(frames: usize, swap_slots: usize) -> Self {
        let pool = PagePool::new(frames);
        let swap_disk = MemDisk::new(swap_slots * PAGE_SIZE / SECTOR_SIZE);
        let vm = Vm::new(pool.clone(), Disk::new(swap_disk.clone()), VmConfig::new());
        Self {
            vm,
            pool,
            swap_disk,
        }
    }

    pub fn process(&self) -> UserProcess {
        UserProcess::new(&self.vm)
    }
}

/// An address space driven the way a cpu would drive it: accesses to pages
/// that are not mapped raise page faults.
pub struct UserProcess {
    pub mm: MmStruct,
    pub pt: Arc<MockPageTable>,
    pub rsp: Va,
}

impl UserProcess {
    pub fn new(vm: &Arc<Vm>) -> Self {
        let pt = Arc::new(MockPageTable::default());
        Self {
            mm: MmStruct::new(vm.clone(), pt.clone()),
            pt,
            rsp: va(STACK_TOP),
        }
    }

    pub fn fork(&self) -> Result<UserProcess, KernelError> {
        let pt = Arc::new(MockPageTable::default());
        Ok(UserProcess {
            mm: self.mm.fork(pt.clone())?,
            pt,
            rsp: self.rsp,
        })
    }

    /// Translates `addr`, faulting until the page is mapped.
    fn access(&mut self, addr: Va, write: bool) -> Result<Kva, KernelError> {
        loop {
            match self.pt.translate(addr) {
                Some((pa, flags)) => {
                    if write && !flags.contains(PteFlags::RW) {
                        let ec =
                            PFErrorCode::PRESENT | PFErrorCode::WRITE_ACCESS | PFErrorCode::USER;
                        self.mm
                            .handle_page_fault(&PageFaultReason::new(ec, addr), self.rsp)?;
                        continue;
                    }
                    self.pt.touch(addr, write);
                    return Ok(pa.into_kva() + addr.offset());
                }
                None => {
                    let mut ec = PFErrorCode::USER;
                    if write {
                        ec |= PFErrorCode::WRITE_ACCESS;
                    }
                    self.mm
                        .handle_page_fault(&PageFaultReason::new(ec, addr), self.rsp)?;
                }
            }
        }
    }

    pub fn write(&mut self, addr: usize, data: &[u8]) -> Result<(), KernelError> {
        for (i, byte) in data.iter().enumerate() {
            let kva = self.access(va(addr + i), true)?;
            unsafe { *(kva.into_usize() as *mut u8) = *byte };
        }
        Ok(())
    }

    pub fn read(&mut self, addr: usize, len: usize) -> Result<Vec<u8>, KernelError> {
        (0..len)
            .map(|i| {
                let kva = self.access(va(addr + i), false)?;
                Ok(unsafe { *(kva.into_usize() as *const u8) })
            })
            .collect()
    }

    pub fn is_resident(&self, addr: usize) -> bool {
        let page = self.mm.spt().find(va(addr)).expect("page must exist");
        let guard = page.lock();
        let resident = guard.is_resident();
        guard.unlock();
        resident
    }
}

/// A page of recognizable content.
pub fn pattern(seed: u8) -> Vec<u8> {
    (0..PAGE_SIZE).map(|i| (i as u8).wrapping_mul(31) ^ seed).collect()
}
