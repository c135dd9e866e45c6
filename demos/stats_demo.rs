use std::collections::hash_map::RandomState;

use clap::Parser;
use evac_set::HashTable;
use evac_set::SeededHasher;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'c', long = "target_capacity", default_value_t = 1000)]
    target_capacity: usize,

    /// Insert this many values on top of the target capacity to force a
    /// growth, and print statistics while it is in progress.
    #[arg(short = 'o', long = "overfill", default_value_t = 1)]
    overfill: usize,

    /// Fraction of the values to remove again afterwards.
    #[arg(short = 'r', long = "remove_fraction", default_value_t = 0.5)]
    remove_fraction: f64,
}

fn main() {
    let args = Args::parse();

    println!(
        "Creating HashTable with target capacity: {}",
        args.target_capacity
    );

    let mut table: HashTable<u64, _> = HashTable::with_capacity(
        args.target_capacity,
        SeededHasher::new(RandomState::new()),
    );

    println!("Actual capacity: {}", table.capacity());
    println!("Filling table with u64 values...");

    let mut num_failures = 0;
    let num_values = table.capacity() as u64;
    for value in 0..num_values {
        match table.try_insert(value) {
            Ok(true) => {}
            Ok(false) => panic!("Value already exists in table: {}", value),
            Err(_) => num_failures += 1,
        }
    }

    println!("Inserted {} values into table", table.len());
    println!(
        "Final load factor: {:.2}%",
        (table.len() as f64 / table.capacity() as f64) * 100.0
    );
    table.debug_stats().print();

    println!();
    println!("Overfilling by {} values...", args.overfill);
    for value in num_values..num_values + args.overfill as u64 {
        table.insert(value);
    }
    table.debug_stats().print();

    let mut cursor = table.cursor();
    let mut steps = 0;
    while table.debug_stats().growing {
        let Some(&value) = cursor.next(&table) else {
            break;
        };
        table.insert(value + (1 << 40));
        steps += 1;
    }
    println!();
    println!(
        "Growth finished after {} cursor steps with interleaved inserts",
        steps
    );
    table.debug_stats().print();
    drop(cursor);

    println!();
    let remove = (table.len() as f64 * args.remove_fraction.clamp(0.0, 1.0)) as u64;
    println!("Removing {} values...", remove);
    for value in 0..remove {
        table.remove(&value);
    }
    table.debug_stats().print();

    println!(
        "Number of failed try_insert attempts: {} ({:.02}%)",
        num_failures,
        num_failures as f64 / num_values as f64 * 100.0
    );
}
