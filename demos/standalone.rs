#![feature(allocator_api)]

use std::alloc::{Allocator, Layout};

use brkalloc::Brkalloc;

static ALLOCATOR: Brkalloc = Brkalloc::new();

fn main() {
    // The raw malloc contract.
    let address = ALLOCATOR.malloc(1024);
    println!("Requested 1024 bytes, received {address:?}");

    let address = unsafe { ALLOCATOR.realloc(address, 4096) };
    println!("Grown to 4096 bytes, now at {address:?}");

    unsafe { ALLOCATOR.free(address) };
    println!("And released again");

    // An exact-size release is recycled in O(1).
    let recycled = ALLOCATOR.malloc(4096);
    println!("Next 4096 byte request came back at {recycled:?}");
    unsafe { ALLOCATOR.free(recycled) };

    // The same allocator drives standard containers through the allocator
    // API.
    println!("\nNow let's try Vec with our allocator...");
    let initial_size = 10;
    let mut v = Vec::with_capacity_in(initial_size, &ALLOCATOR);
    for i in 0..initial_size {
        v.push(i as u32);
    }
    println!("Initial Vec at {:?} = {v:?}", v.as_ptr());

    for i in 0..1024 {
        v.push(i);
    }
    println!("After growing, Vec lives at {:?}", v.as_ptr());
    println!("First 15 elements: {:?}", &v[0..15]);

    // Stronger alignment than the word multiple is out of contract.
    let exotic = Layout::from_size_align(64, 64).unwrap();
    println!(
        "\n64-byte aligned request: {:?}",
        ALLOCATOR.allocate(exotic).map(|_| ())
    );
}
