//! Micro-benchmarks for the routing table and the shortlist of a search:
//! add, closest, and remove at varying table sizes. Reports nanoseconds-per-operation.
//!
//! Run: `cargo bench --bench routing_table`

use bazaar_dht::{ClosestNodes, Contact, Id, KademliaTable, RoutingTable, MAX_BUCKET_SIZE_K};
use std::time::Instant;

fn main() {
    println!("routing_table\n");

    bench_add();
    bench_closest();
    bench_remove();
    bench_shortlist();
}

fn filled(size: usize) -> KademliaTable {
    let mut table = KademliaTable::new(Id::random());
    for _ in 0..size {
        table.add_contact(Contact::random());
    }
    table
}

fn bench_add() {
    println!("add");

    // Pre-generate contacts outside the timed section
    let contacts: Vec<_> = (0..1000).map(|_| Contact::random()).collect();

    for size in [0, 100, 400] {
        let mut table = filled(size);

        let start = Instant::now();
        for contact in contacts.iter().cloned() {
            table.add_contact(contact);
        }
        let per_op = start.elapsed().as_nanos() / contacts.len() as u128;
        println!(
            "{size:>3} nodes: {per_op}ns/op (final size: {})",
            table.size()
        );
    }

    println!();
}

fn bench_closest() {
    println!("closest");

    let targets: Vec<_> = (0..1000).map(|_| Id::random()).collect();

    for size in [50, 100, 200, 400] {
        let table = filled(size);

        let start = Instant::now();
        for target in &targets {
            let _ = table.find_close_nodes(target, MAX_BUCKET_SIZE_K, None);
        }
        let per_op = start.elapsed().as_nanos() / targets.len() as u128;
        println!("{size:>3} nodes: {per_op}ns/op");
    }

    println!();
}

fn bench_remove() {
    println!("remove");

    let mut table = KademliaTable::new(Id::random());

    let mut guids = Vec::new();
    for _ in 0..200 {
        let contact = Contact::random();
        guids.push(contact.guid);
        table.add_contact(contact);
    }

    let n = guids.len();
    let start = Instant::now();
    for guid in &guids {
        table.remove_contact(guid);
    }
    let per_op = start.elapsed().as_nanos() / n as u128;
    println!("{per_op}ns/op ({n} removals)");
    println!();
}

fn bench_shortlist() {
    println!("shortlist");

    let contacts: Vec<_> = (0..1000).map(|_| Contact::random()).collect();

    for size in [20, 100, 1000] {
        let mut shortlist = ClosestNodes::new(Id::random());

        let start = Instant::now();
        for contact in contacts.iter().take(size).cloned() {
            shortlist.add(contact);
        }
        let per_op = start.elapsed().as_nanos() / size as u128;
        println!("{size:>4} nodes: {per_op}ns/op");
    }

    println!();
}
