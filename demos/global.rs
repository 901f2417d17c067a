use brkalloc::Brkalloc;

// NOTE: This example doesn't work under Miri. When `cfg!(miri)` the segment
// is simulated with `std::alloc::alloc` because Miri can't do the `sbrk`
// FFI call, and if we are the global allocator that simulation would call
// straight back into ourselves while holding our own lock.

#[global_allocator]
static ALLOCATOR: Brkalloc = Brkalloc::new();

fn main() {
    let num = Box::new(10);
    println!("Boxed num {num} at {:?}", &*num as *const usize);

    let mut vec = Vec::with_capacity(*num);

    for i in 0..*num {
        vec.push(i);
    }

    println!("Vec: {vec:?} at {:?}", vec.as_ptr());

    let handle = std::thread::spawn(|| {
        let mut vec: Vec<u8> = Vec::with_capacity(256);
        vec.push(5);
        vec.push(6);
        println!("Second thread Vec: {vec:?} at {:?}", vec.as_ptr());
    });

    handle.join().unwrap();

    // Larger than the coarse block, so the segment has to grow for this one.
    let cap = 16 * 1024 * 1024;
    let mut vec: Vec<u8> = Vec::with_capacity(cap);
    vec.push(1);

    println!("Large allocation of {cap} bytes at {:?}", vec.as_ptr());
}
