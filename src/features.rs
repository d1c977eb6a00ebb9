//! Device feature chain management.
//!
//! This module provides [`DeviceFeatureSet`], an ordered, type-erased
//! container for the `p_next`-chained feature structures that Vulkan uses to
//! negotiate optional device capabilities.
//!
//! # Overview
//!
//! `vkCreateDevice` receives optional capability requests as a singly linked
//! chain of extension structures, each starting with an `s_type` tag and a
//! `p_next` forward pointer. [`DeviceFeatureSet`] owns one heap allocation per
//! stored structure, keeps them threaded together in insertion order, and lets
//! callers address them by their structure type:
//!
//! ```
//! use ash::vk;
//! use scoria::features::DeviceFeatureSet;
//!
//! let mut features = DeviceFeatureSet::default();
//! features.insert(vk::PhysicalDeviceFeatures2::default());
//! features.insert(
//!     vk::PhysicalDeviceTimelineSemaphoreFeatures::default().timeline_semaphore(true),
//! );
//!
//! // The head pointer is what goes into `DeviceCreateInfo::p_next`.
//! assert!(!features.head().is_null());
//! let stored = features
//!     .read::<vk::PhysicalDeviceTimelineSemaphoreFeatures>()
//!     .unwrap();
//! assert_eq!(stored.timeline_semaphore, vk::TRUE);
//! ```
//!
//! # Pointer validity
//!
//! Every raw pointer handed out by this module ([`head`](DeviceFeatureSet::head),
//! [`map`](DeviceFeatureSet::map), and the links between entries) borrows from
//! storage owned by the set. Such a pointer stays valid until the set is
//! cleared, dropped, or moved out with [`std::mem::take`]; it must never
//! outlive the set that produced it. The set is a single-owner value type with
//! no internal synchronization — mutating it from multiple threads without
//! external locking is undefined.

use ash::vk::{self, TaggedStructure};
use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr::{null, null_mut};

/// One type-erased chain entry. Each stored structure type gets exactly one
/// [`FeatureSlot`] behind this interface.
trait FeatureHolder {
    /// Deep copy with a zeroed link. The clone's chain position is the
    /// caller's responsibility.
    fn clone_holder(&self) -> Box<dyn FeatureHolder>;
    fn read(&self) -> *const c_void;
    /// Overwrites the payload while keeping the current link intact.
    fn write(&mut self, data: *const c_void);
    fn link(&mut self, next: *mut c_void);
    fn unlink(&mut self);
    fn as_mut_ptr(&mut self) -> *mut c_void;
    /// Copies the current link into the scratch slot.
    fn save_link(&mut self);
    /// Restores the link from the scratch slot and clears the scratch.
    fn restore_link(&mut self);
}

struct FeatureSlot<T> {
    value: T,
    saved_next: *mut c_void,
}

impl<T: TaggedStructure + Copy + 'static> FeatureSlot<T> {
    fn new(value: T) -> Self {
        let mut slot = Self {
            value,
            saved_next: null_mut(),
        };
        slot.set_next(null_mut());
        slot
    }

    // Safety: `TaggedStructure` guarantees the value starts with the
    // (s_type, p_next) header that `vk::BaseOutStructure` models.
    fn next(&self) -> *mut c_void {
        unsafe {
            (*(&self.value as *const T as *const vk::BaseOutStructure<'static>)).p_next
                as *mut c_void
        }
    }
    fn set_next(&mut self, next: *mut c_void) {
        unsafe {
            (*(&mut self.value as *mut T as *mut vk::BaseOutStructure<'static>)).p_next =
                next as *mut vk::BaseOutStructure<'static>;
        }
    }
}

impl<T: TaggedStructure + Copy + 'static> FeatureHolder for FeatureSlot<T> {
    fn clone_holder(&self) -> Box<dyn FeatureHolder> {
        Box::new(Self::new(self.value))
    }
    fn read(&self) -> *const c_void {
        &self.value as *const T as *const c_void
    }
    fn write(&mut self, data: *const c_void) {
        let next = self.next();
        self.value = unsafe { *(data as *const T) };
        self.set_next(next);
    }
    fn link(&mut self, next: *mut c_void) {
        self.set_next(next);
    }
    fn unlink(&mut self) {
        self.set_next(null_mut());
    }
    fn as_mut_ptr(&mut self) -> *mut c_void {
        &mut self.value as *mut T as *mut c_void
    }
    fn save_link(&mut self) {
        self.saved_next = self.next();
    }
    fn restore_link(&mut self) {
        let next = self.saved_next;
        self.set_next(next);
        self.saved_next = null_mut();
    }
}

/// An ordered set of Vulkan feature structures threaded into a `p_next` chain.
///
/// Entries are stored boxed in insertion order; insertion order is chain
/// order. A structure-type index provides O(1) membership and lookup. At most
/// one entry per structure type may be present — [`insert`](Self::insert) of a
/// duplicate tag is a rejected no-op and [`write`](Self::write) is the way to
/// update an existing entry.
///
/// The set remembers a *tail successor*: an external pointer that should
/// follow its last entry, recorded by [`link_tail`](Self::link_tail) and
/// inherited by entries appended afterwards. The tail successor is not owned
/// by the set.
///
/// Cloning deep-copies every entry and rebuilds the internal links (pointers
/// into the source would be meaningless in the copy). The clone's tail is left
/// unlinked and its recorded tail successor is cleared, even if the source had
/// one; callers re-attach the copy with [`link_tail`](Self::link_tail).
pub struct DeviceFeatureSet {
    index: HashMap<vk::StructureType, usize>,
    entries: Vec<Box<dyn FeatureHolder>>,
    tail_next: *mut c_void,
}

// The raw pointers inside are links between entries owned by this set plus a
// caller-provided tail successor; single-owner access is the documented
// contract.
unsafe impl Send for DeviceFeatureSet {}
unsafe impl Sync for DeviceFeatureSet {}

impl Default for DeviceFeatureSet {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
            tail_next: null_mut(),
        }
    }
}

impl Clone for DeviceFeatureSet {
    fn clone(&self) -> Self {
        let mut entries: Vec<Box<dyn FeatureHolder>> =
            self.entries.iter().map(|e| e.clone_holder()).collect();
        for i in 1..entries.len() {
            let ptr = entries[i].as_mut_ptr();
            entries[i - 1].link(ptr);
        }
        Self {
            index: self.index.clone(),
            entries,
            tail_next: null_mut(),
        }
    }
}

impl DeviceFeatureSet {
    /// Returns whether a structure of type `T` is stored.
    pub fn contains<T: TaggedStructure + Copy + 'static>(&self) -> bool {
        self.index.contains_key(&T::STRUCTURE_TYPE)
    }

    /// Appends `value` to the chain.
    ///
    /// The stored copy's link field is zeroed, then wired up: the previous
    /// last entry is linked to the new entry, and the new entry inherits the
    /// recorded tail successor. Inserting into an empty set leaves the sole
    /// entry unlinked until [`link_tail`](Self::link_tail) is called, even if
    /// a tail successor was recorded earlier.
    ///
    /// Returns `false` without mutating anything if a structure of the same
    /// type is already present; use [`write`](Self::write) to update it.
    pub fn insert<T: TaggedStructure + Copy + 'static>(&mut self, value: T) -> bool {
        if self.contains::<T>() {
            return false;
        }
        self.push_entry(T::STRUCTURE_TYPE, Box::new(FeatureSlot::new(value)));
        true
    }

    fn push_entry(&mut self, tag: vk::StructureType, holder: Box<dyn FeatureHolder>) {
        let slot = self.entries.len();
        self.entries.push(holder);
        self.index.insert(tag, slot);
        if slot > 0 {
            let tail_next = self.tail_next;
            let ptr = self.entries[slot].as_mut_ptr();
            self.entries[slot].link(tail_next);
            self.entries[slot - 1].link(ptr);
        }
    }

    /// Returns the stored structure of type `T`, appending a
    /// default-initialized one first if absent.
    pub fn get_or_insert<T: TaggedStructure + Copy + Default + 'static>(&mut self) -> &T {
        if !self.contains::<T>() {
            self.push_entry(T::STRUCTURE_TYPE, Box::new(FeatureSlot::new(T::default())));
        }
        let slot = self.index[&T::STRUCTURE_TYPE];
        unsafe { &*(self.entries[slot].read() as *const T) }
    }

    /// Returns a reference to the stored structure of type `T`, or `None` if
    /// absent. Pure lookup, never inserts.
    pub fn find<T: TaggedStructure + Copy + 'static>(&self) -> Option<&T> {
        let slot = *self.index.get(&T::STRUCTURE_TYPE)?;
        Some(unsafe { &*(self.entries[slot].read() as *const T) })
    }

    /// Copies the stored structure of type `T` out of the chain.
    ///
    /// The returned copy has its link field zeroed so no internal chain
    /// pointer escapes the set.
    pub fn read<T: TaggedStructure + Copy + 'static>(&self) -> Option<T> {
        let mut value = *self.find::<T>()?;
        unsafe {
            (*(&mut value as *mut T as *mut vk::BaseOutStructure<'static>)).p_next = null_mut();
        }
        Some(value)
    }

    /// Copies the stored structure of type `T` into `out` (link zeroed) and
    /// returns `true`, or leaves `out` untouched and returns `false` if
    /// absent.
    pub fn read_into<T: TaggedStructure + Copy + 'static>(&self, out: &mut T) -> bool {
        match self.read::<T>() {
            Some(value) => {
                *out = value;
                true
            }
            None => false,
        }
    }

    /// Overwrites the payload of the stored structure of type `T`, keeping
    /// its current chain link. Returns `false` if absent.
    pub fn write<T: TaggedStructure + Copy + 'static>(&mut self, value: T) -> bool {
        let Some(&slot) = self.index.get(&T::STRUCTURE_TYPE) else {
            return false;
        };
        self.entries[slot].write(&value as *const T as *const c_void);
        true
    }

    /// Saves the chain link of the stored structure of type `T` and returns a
    /// mutable pointer to it, for a foreign call that writes through the
    /// pointer (and may clobber the link field).
    ///
    /// Must be paired with [`unmap`](Self::unmap), which restores the saved
    /// link. Calling `unmap` without a matching `map` restores a stale
    /// scratch value; the pairing is the caller's responsibility and is not
    /// checked. The pointer is invalidated by any structural mutation of the
    /// set.
    pub fn map<T: TaggedStructure + Copy + 'static>(&mut self) -> Option<*mut T> {
        let slot = *self.index.get(&T::STRUCTURE_TYPE)?;
        let holder = &mut self.entries[slot];
        holder.save_link();
        Some(holder.as_mut_ptr() as *mut T)
    }

    /// Restores the chain link saved by a prior [`map`](Self::map) of `T`.
    /// Returns `false` if no structure of type `T` is stored.
    pub fn unmap<T: TaggedStructure + Copy + 'static>(&mut self) -> bool {
        let Some(&slot) = self.index.get(&T::STRUCTURE_TYPE) else {
            return false;
        };
        self.entries[slot].restore_link();
        true
    }

    /// Returns the address of the first entry — the value to hand to a
    /// create-info record expecting the head of an extension chain — or null
    /// if the set is empty.
    pub fn head(&self) -> *const c_void {
        self.entries.first().map_or(null(), |e| e.read())
    }

    /// Links the last entry to an externally owned successor and records it
    /// for entries appended later. No-op on an empty set.
    pub fn link_tail(&mut self, next: *mut c_void) {
        if let Some(last) = self.entries.last_mut() {
            last.link(next);
            self.tail_next = next;
        }
    }

    /// Clears the last entry's link and forgets the recorded tail successor.
    /// No-op on an empty set.
    pub fn unlink_tail(&mut self) {
        if let Some(last) = self.entries.last_mut() {
            last.unlink();
            self.tail_next = null_mut();
        }
    }

    /// Removes every entry. The recorded tail successor is separate state and
    /// survives; entries appended afterwards inherit it again.
    pub fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Base = vk::PhysicalDeviceFeatures2<'static>;
    type Timeline = vk::PhysicalDeviceTimelineSemaphoreFeatures<'static>;
    type Sync2 = vk::PhysicalDeviceSynchronization2Features<'static>;
    type Storage16 = vk::PhysicalDevice16BitStorageFeatures<'static>;

    fn link_of<T>(value: &T) -> *mut c_void {
        unsafe {
            (*(value as *const T as *const vk::BaseOutStructure<'static>)).p_next as *mut c_void
        }
    }

    fn addr_of_entry<T>(value: &T) -> *const c_void {
        value as *const T as *const c_void
    }

    #[test]
    fn insert_rejects_duplicate_tag() {
        let mut set = DeviceFeatureSet::default();
        assert!(set.insert(Timeline::default().timeline_semaphore(true)));
        assert!(!set.insert(Timeline::default().timeline_semaphore(false)));
        // First value wins; the duplicate insert must not mutate.
        assert_eq!(set.read::<Timeline>().unwrap().timeline_semaphore, vk::TRUE);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn read_round_trips_payload_with_zeroed_link() {
        let mut set = DeviceFeatureSet::default();
        let mut original = Storage16::default().storage_buffer16_bit_access(true);
        original.storage_input_output16 = vk::TRUE;
        set.insert(original);
        set.insert(Sync2::default()); // links storage16 -> sync2 internally

        let copy = set.read::<Storage16>().unwrap();
        assert_eq!(copy.storage_buffer16_bit_access, vk::TRUE);
        assert_eq!(copy.storage_input_output16, vk::TRUE);
        assert_eq!(copy.uniform_and_storage_buffer16_bit_access, vk::FALSE);
        assert!(link_of(&copy).is_null());
    }

    #[test]
    fn entries_link_in_insertion_order() {
        let mut set = DeviceFeatureSet::default();
        set.insert(Base::default());
        set.insert(Timeline::default());
        set.insert(Sync2::default());

        let base = set.find::<Base>().unwrap();
        let timeline = set.find::<Timeline>().unwrap();
        let sync2 = set.find::<Sync2>().unwrap();

        assert_eq!(set.head(), addr_of_entry(base));
        assert_eq!(link_of(base), addr_of_entry(timeline) as *mut c_void);
        assert_eq!(link_of(timeline), addr_of_entry(sync2) as *mut c_void);
        assert!(link_of(sync2).is_null());
    }

    #[test]
    fn link_tail_chains_external_successor() {
        let mut external = vk::MemoryDedicatedAllocateInfo::default();
        let external_ptr = &mut external as *mut _ as *mut c_void;

        let mut set = DeviceFeatureSet::default();
        set.insert(Base::default());
        set.insert(Timeline::default());
        set.link_tail(external_ptr);

        let base = set.find::<Base>().unwrap();
        let timeline = set.find::<Timeline>().unwrap();
        assert_eq!(set.head(), addr_of_entry(base));
        assert_eq!(link_of(base), addr_of_entry(timeline) as *mut c_void);
        assert_eq!(link_of(timeline), external_ptr);

        // Entries appended after link_tail inherit the successor.
        set.insert(Sync2::default());
        let timeline = set.find::<Timeline>().unwrap();
        let sync2 = set.find::<Sync2>().unwrap();
        assert_eq!(link_of(timeline), addr_of_entry(sync2) as *mut c_void);
        assert_eq!(link_of(sync2), external_ptr);

        set.unlink_tail();
        assert!(link_of(set.find::<Sync2>().unwrap()).is_null());
    }

    #[test]
    fn insert_into_empty_ignores_recorded_tail() {
        // A tail successor recorded while non-empty does not attach to the
        // first entry inserted after a clear; only an explicit link_tail does.
        let mut external = vk::MemoryDedicatedAllocateInfo::default();
        let external_ptr = &mut external as *mut _ as *mut c_void;

        let mut set = DeviceFeatureSet::default();
        set.insert(Base::default());
        set.link_tail(external_ptr);
        set.clear();
        assert!(set.is_empty());

        set.insert(Timeline::default());
        assert!(link_of(set.find::<Timeline>().unwrap()).is_null());

        // A second entry appends past the first and picks the recorded
        // successor back up.
        set.insert(Sync2::default());
        assert_eq!(link_of(set.find::<Sync2>().unwrap()), external_ptr);
    }

    #[test]
    fn clone_copies_payloads_and_relinks() {
        let mut external = vk::MemoryDedicatedAllocateInfo::default();
        let external_ptr = &mut external as *mut _ as *mut c_void;

        let mut set = DeviceFeatureSet::default();
        set.insert(Base::default());
        set.insert(Timeline::default().timeline_semaphore(true));
        set.insert(Sync2::default().synchronization2(true));
        set.link_tail(external_ptr);

        let copy = set.clone();
        assert_eq!(copy.len(), 3);
        assert_eq!(
            copy.read::<Timeline>().unwrap().timeline_semaphore,
            vk::TRUE
        );
        assert_eq!(copy.read::<Sync2>().unwrap().synchronization2, vk::TRUE);

        // The copy is internally linked over its own storage.
        let base = copy.find::<Base>().unwrap();
        let timeline = copy.find::<Timeline>().unwrap();
        let sync2 = copy.find::<Sync2>().unwrap();
        assert_eq!(copy.head(), addr_of_entry(base));
        assert_eq!(link_of(base), addr_of_entry(timeline) as *mut c_void);
        assert_eq!(link_of(timeline), addr_of_entry(sync2) as *mut c_void);
        assert_ne!(copy.head(), set.head());

        // The original's tail successor is not carried over.
        assert!(link_of(sync2).is_null());
    }

    #[test]
    fn mutating_clone_leaves_original_untouched() {
        let mut set = DeviceFeatureSet::default();
        set.insert(Timeline::default().timeline_semaphore(true));

        let mut copy = set.clone();
        copy.write(Timeline::default().timeline_semaphore(false));

        assert_eq!(set.read::<Timeline>().unwrap().timeline_semaphore, vk::TRUE);
        assert_eq!(
            copy.read::<Timeline>().unwrap().timeline_semaphore,
            vk::FALSE
        );
    }

    #[test]
    fn take_leaves_source_empty() {
        let mut external = vk::MemoryDedicatedAllocateInfo::default();

        let mut set = DeviceFeatureSet::default();
        set.insert(Base::default());
        set.insert(Timeline::default());
        set.link_tail(&mut external as *mut _ as *mut c_void);

        let moved = std::mem::take(&mut set);
        assert_eq!(moved.len(), 2);
        assert!(set.is_empty());
        assert!(set.head().is_null());
        // The drained source records no tail successor either: appending two
        // fresh entries leaves the second one unlinked.
        set.insert(Base::default());
        set.insert(Sync2::default());
        assert!(link_of(set.find::<Sync2>().unwrap()).is_null());
    }

    #[test]
    fn map_unmap_restores_link() {
        let mut set = DeviceFeatureSet::default();
        set.insert(Base::default());
        set.insert(Timeline::default());
        set.insert(Sync2::default());

        let before = link_of(set.find::<Timeline>().unwrap());
        assert!(!before.is_null());

        let ptr = set.map::<Timeline>().unwrap();
        // A foreign call writes through the pointer and clobbers the link.
        unsafe {
            (*ptr).timeline_semaphore = vk::TRUE;
            (*(ptr as *mut vk::BaseOutStructure<'static>)).p_next = null_mut();
        }
        assert!(set.unmap::<Timeline>());

        assert_eq!(link_of(set.find::<Timeline>().unwrap()), before);
        assert_eq!(set.read::<Timeline>().unwrap().timeline_semaphore, vk::TRUE);
    }

    #[test]
    fn map_immediately_unmapped_is_identity() {
        let mut external = vk::MemoryDedicatedAllocateInfo::default();
        let external_ptr = &mut external as *mut _ as *mut c_void;

        let mut set = DeviceFeatureSet::default();
        set.insert(Sync2::default());
        set.link_tail(external_ptr);

        set.map::<Sync2>().unwrap();
        set.unmap::<Sync2>();
        assert_eq!(link_of(set.find::<Sync2>().unwrap()), external_ptr);
    }

    #[test]
    fn map_absent_fails() {
        let mut set = DeviceFeatureSet::default();
        assert!(set.map::<Timeline>().is_none());
        assert!(!set.unmap::<Timeline>());
    }

    #[test]
    fn write_absent_is_a_rejected_noop() {
        let mut set = DeviceFeatureSet::default();
        assert!(!set.write(Timeline::default()));
        assert!(!set.contains::<Timeline>());
    }

    #[test]
    fn write_preserves_existing_link() {
        let mut set = DeviceFeatureSet::default();
        set.insert(Timeline::default());
        set.insert(Sync2::default());

        let before = link_of(set.find::<Timeline>().unwrap());
        assert!(!before.is_null());

        // The incoming value carries a bogus link; the stored link must win.
        let mut bogus = vk::MemoryDedicatedAllocateInfo::default();
        let mut update = Timeline::default().timeline_semaphore(true);
        unsafe {
            (*(&mut update as *mut Timeline as *mut vk::BaseOutStructure<'static>)).p_next =
                &mut bogus as *mut _ as *mut vk::BaseOutStructure<'static>;
        }
        assert!(set.write(update));

        assert_eq!(link_of(set.find::<Timeline>().unwrap()), before);
        assert_eq!(set.read::<Timeline>().unwrap().timeline_semaphore, vk::TRUE);
    }

    #[test]
    fn get_or_insert_creates_default_entry() {
        let mut set = DeviceFeatureSet::default();
        assert!(!set.contains::<Storage16>());

        let value = *set.get_or_insert::<Storage16>();
        assert_eq!(value.storage_buffer16_bit_access, vk::FALSE);
        assert!(set.contains::<Storage16>());

        // A second call returns the stored entry rather than re-inserting.
        set.write(Storage16::default().storage_buffer16_bit_access(true));
        assert_eq!(
            set.get_or_insert::<Storage16>().storage_buffer16_bit_access,
            vk::TRUE
        );
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn read_into_absent_leaves_out_untouched() {
        let set = DeviceFeatureSet::default();
        let mut out = Timeline::default().timeline_semaphore(true);
        assert!(!set.read_into(&mut out));
        assert_eq!(out.timeline_semaphore, vk::TRUE);
    }

    #[test]
    fn head_is_null_when_empty() {
        let mut set = DeviceFeatureSet::default();
        assert!(set.head().is_null());
        assert!(set.find::<Base>().is_none());
        set.insert(Base::default());
        set.clear();
        assert!(set.head().is_null());
        assert_eq!(set.len(), 0);
    }
}
