//! Domains, their runtime modules and the weak back-references between them

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use memory_manager::{Domain, GcConfig, GcKind, Heap, RuntimeModule};
use storage_provider::MallocStorageProvider;

fn heap() -> Heap {
    let provider = Arc::new(MallocStorageProvider::new(1 << 16).unwrap());
    Heap::new(GcConfig::default(), provider).unwrap()
}

fn module(id: u32, deleted: &Rc<RefCell<Vec<u32>>>) -> RuntimeModule {
    let log = deleted.clone();
    RuntimeModule::new(id, format!("module{}.js", id), vec![0; 16])
        .with_delete_hook(move |id| log.borrow_mut().push(id))
}

#[test]
fn test_rooted_domain_keeps_modules_across_collections() {
    let mut heap = heap();
    let deleted = Rc::new(RefCell::new(Vec::new()));
    let domain = Domain::create(&mut heap).unwrap();
    let id = heap.add_root(domain);
    for i in 0..3 {
        Domain::add_module(&mut heap, domain, module(i, &deleted));
    }

    heap.collect(GcKind::Young);
    heap.collect(GcKind::Full);
    heap.collect(GcKind::Full);

    let moved = heap.root(id).unwrap();
    assert_ne!(moved, domain);
    assert_eq!(Domain::module_count(&heap, moved), 3);
    Domain::with_modules(&heap, moved, |modules| {
        for module in modules {
            assert_eq!(module.domain(&heap), Some(moved));
            assert_eq!(module.bytecode().len(), 16);
        }
    });
    assert!(deleted.borrow().is_empty());
    assert_eq!(heap.info().weak_refs, 3);
}

#[test]
fn test_unreachable_domain_deletes_modules_once() {
    let mut heap = heap();
    let deleted = Rc::new(RefCell::new(Vec::new()));
    let domain = Domain::create(&mut heap).unwrap();
    let id = heap.add_root(domain);
    for i in 0..3 {
        Domain::add_module(&mut heap, domain, module(i, &deleted));
    }
    heap.collect(GcKind::Young);

    heap.remove_root(id);
    heap.collect(GcKind::Full);
    let mut ids = deleted.borrow().clone();
    ids.sort();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(heap.info().weak_refs, 0);
    assert_eq!(heap.info().native_resources, 0);

    heap.collect(GcKind::Full);
    assert_eq!(deleted.borrow().len(), 3);
}

#[test]
fn test_young_domain_dies_with_its_modules() {
    let deleted = Rc::new(RefCell::new(Vec::new()));
    let mut heap = heap();
    let domain = Domain::create(&mut heap).unwrap();
    Domain::add_module(&mut heap, domain, module(9, &deleted));
    heap.collect(GcKind::Young);
    assert_eq!(*deleted.borrow(), vec![9]);
    assert_eq!(heap.info().weak_refs, 0);
}

#[test]
fn test_cjs_module_table_survives_collection() {
    let mut heap = heap();
    let domain = Domain::create(&mut heap).unwrap();
    let id = heap.add_root(domain);
    let exports = heap.alloc_object(None).unwrap();
    let table = heap.alloc_array_storage(&[Some(exports)]).unwrap();
    let domain = heap.root(id).unwrap();
    Domain::set_cjs_modules(&mut heap, domain, Some(table));

    heap.collect(GcKind::Full);
    let domain = heap.root(id).unwrap();
    let table = Domain::cjs_modules(&heap, domain).unwrap();
    assert_eq!(heap.array_len(table), 1);
    assert!(heap.array_get(table, 0).is_some());
}

#[test]
fn test_heap_teardown_deletes_modules() {
    let deleted = Rc::new(RefCell::new(Vec::new()));
    {
        let mut heap = heap();
        let domain = Domain::create(&mut heap).unwrap();
        heap.add_root(domain);
        Domain::add_module(&mut heap, domain, module(4, &deleted));
        heap.collect(GcKind::Full);
        assert!(deleted.borrow().is_empty());
    }
    assert_eq!(*deleted.borrow(), vec![4]);
}
