use clap::Parser;

use num_bigint::BigInt;

use bytegraph::{
    HeapResult, MapKey, ObjectBuffer, ObjectBufferBuilder, OwnedMapKey, PropertyValue, ScalarValue,
};

/// Raw command line arguments.
#[derive(Parser)]
#[command(about)]
pub struct Args {
    /// The backing buffer size, in bytes.
    #[arg(long, default_value_t = 64 * 1024)]
    pub buffer_size: usize,

    /// Number of properties to insert into the root object
    #[arg(long, default_value_t = 64)]
    pub entries: u32,

    /// Extra element slots reserved on each array growth
    #[arg(long, default_value_t = 8)]
    pub array_slack: u32,

    /// Delete every other property again after inserting
    #[arg(long, default_value_t = false)]
    pub churn: bool,

    /// Detach the buffer to raw bytes and reattach it before reading back
    #[arg(long, default_value_t = false)]
    pub transfer: bool,

    /// Print every key left on the root object
    #[arg(long, default_value_t = false)]
    pub print_keys: bool,
}

pub fn print_error_message_and_exit(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn create_buffer(args: &Args) -> HeapResult<ObjectBuffer> {
    ObjectBufferBuilder::new()
        .buffer_size(args.buffer_size)
        .array_additional_allocation(args.array_slack)
        .build()
}

fn populate(ob: &mut ObjectBuffer, args: &Args) -> HeapResult<()> {
    let root = ob.root();

    for index in 0..args.entries {
        let key = format!("property-{index}");
        ob.set(root, MapKey::String(key.as_str()), &ScalarValue::Number(index as f64))?;
    }

    // A few structured values so the dump is not just numbers
    ob.set(root, MapKey::String("title"), &ScalarValue::String("bytegraph demo"))?;
    let wide = BigInt::from(u64::MAX);
    ob.set(root, MapKey::String("wide"), &ScalarValue::WideInt(&wide))?;

    let nested = ob.create_object(root, MapKey::String("nested"))?;
    ob.set(nested, MapKey::String("inner"), &ScalarValue::Boolean(true))?;

    let list = ob.create_array(root, MapKey::String("list"))?;
    for index in 0..8 {
        ob.push(list, &ScalarValue::Number(index as f64))?;
    }

    if args.churn {
        for index in (0..args.entries).step_by(2) {
            let key = format!("property-{index}");
            ob.delete(root, MapKey::String(key.as_str()))?;
        }
    }

    Ok(())
}

fn report(ob: &ObjectBuffer, args: &Args) -> HeapResult<()> {
    let root = ob.root();
    let stats = ob.memory_stats();

    println!("root properties: {}", ob.len(root)?);
    println!("used:            {} bytes", stats.used);
    println!("top:             {} bytes", stats.top);
    println!("capacity:        {} bytes", stats.capacity);

    if let Some(PropertyValue::Array(list)) = ob.get(root, MapKey::String("list"))? {
        println!("list length:     {}", ob.array_len(list)?);
    }

    if args.print_keys {
        for key in ob.keys(root)? {
            match key {
                OwnedMapKey::String(key) => println!("  {key}"),
                OwnedMapKey::Number(key) => println!("  {key}"),
            }
        }
    }

    Ok(())
}

fn run(args: &Args) -> HeapResult<()> {
    let mut ob = create_buffer(args)?;
    populate(&mut ob, args)?;

    let ob = if args.transfer {
        // Round-trip through raw bytes, as if handed to another context
        let bytes = ob.into_bytes();
        ObjectBuffer::from_bytes(bytes, Default::default())?
    } else {
        ob
    };

    report(&ob, args)?;
    ob.close()?;
    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(err) = run(&args) {
        print_error_message_and_exit(&format!("bytegraph example failed: {err}"));
    }
}
