use adcstream_core::HeapLayout;
use anyhow::{anyhow, Context, Result};
use goblin::elf::Elf;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Linker symbols marking the end of static data, first name wins.
/// `_end` comes from CubeIDE scripts, `__sheap` from cortex-m-rt.
pub const HEAP_START_SYMBOLS: &[&str] = &["_end", "__sheap", "end"];
/// Top of RAM / initial main stack pointer.
pub const STACK_TOP_SYMBOLS: &[&str] = &["_estack", "_stack_start"];
/// Absolute symbol whose value is the reserved stack size.
pub const MIN_STACK_SYMBOLS: &[&str] = &["_Min_Stack_Size", "_min_stack_size"];

/// Reads the heap bounds out of a firmware ELF's symbol table.
pub fn load_layout(path: &Path) -> Result<HeapLayout> {
    let buffer = fs::read(path).with_context(|| format!("Failed to read ELF file: {:?}", path))?;
    let elf = Elf::parse(&buffer).context("Failed to parse ELF binary")?;

    let mut symbols = HashMap::new();
    for sym in elf.syms.iter() {
        if let Some(name) = elf.strtab.get_at(sym.st_name) {
            if !name.is_empty() {
                symbols.insert(name, sym.st_value);
            }
        }
    }
    debug!("Read {} symbols from {:?}", symbols.len(), path);

    let layout = resolve_layout(&symbols)?;
    info!(
        "Heap {:#x}..{:#x} ({} bytes), stack reserve {} bytes",
        layout.heap_start,
        layout.limit().unwrap_or(0),
        layout.capacity(),
        layout.min_stack_size
    );
    Ok(layout)
}

/// Builds a [`HeapLayout`] from a name-to-value symbol map.
pub fn resolve_layout(symbols: &HashMap<&str, u64>) -> Result<HeapLayout> {
    let heap_start = lookup(symbols, HEAP_START_SYMBOLS)?;
    let stack_top = lookup(symbols, STACK_TOP_SYMBOLS)?;
    let min_stack_size = lookup(symbols, MIN_STACK_SYMBOLS)?;

    let layout = HeapLayout::new(
        to_usize(heap_start)?,
        to_usize(stack_top)?,
        to_usize(min_stack_size)?,
    );
    layout.validate().context("Linker symbols describe an invalid heap")?;
    Ok(layout)
}

fn lookup(symbols: &HashMap<&str, u64>, names: &[&str]) -> Result<u64> {
    names
        .iter()
        .find_map(|name| symbols.get(name).copied())
        .ok_or_else(|| anyhow!("Missing linker symbol (looked for {})", names.join(", ")))
}

fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| anyhow!("Symbol value {:#x} out of range", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_symbols() {
        let symbols = HashMap::from([
            ("_end", 0x2000_0000u64),
            ("_estack", 0x2000_1400),
            ("_Min_Stack_Size", 0x400),
        ]);
        let layout = resolve_layout(&symbols).unwrap();
        assert_eq!(layout.heap_start, 0x2000_0000);
        assert_eq!(layout.limit(), Some(0x2000_1000));
    }

    #[test]
    fn test_cortex_m_rt_symbols() {
        let symbols = HashMap::from([
            ("__sheap", 0x2000_0100u64),
            ("_stack_start", 0x2001_8000),
            ("_Min_Stack_Size", 0x800),
        ]);
        let layout = resolve_layout(&symbols).unwrap();
        assert_eq!(layout.capacity(), 0x1_8000 - 0x800 - 0x100);
    }

    #[test]
    fn test_missing_symbol() {
        let symbols = HashMap::from([("_end", 0x2000_0000u64), ("_estack", 0x2000_1400)]);
        let err = resolve_layout(&symbols).unwrap_err();
        assert!(err.to_string().contains("_Min_Stack_Size"));
    }

    #[test]
    fn test_invalid_layout() {
        let symbols = HashMap::from([
            ("_end", 0x2000_2000u64),
            ("_estack", 0x2000_1400),
            ("_Min_Stack_Size", 0x400),
        ]);
        assert!(resolve_layout(&symbols).is_err());
    }

    /// Minimal little-endian ELF32 (ARM) with only a symbol table.
    fn elf_with_symbols(symbols: &[(&str, u32)]) -> Vec<u8> {
        const EHDR: usize = 52;
        const SHDR: usize = 40;
        const SYM: usize = 16;
        const SHN_ABS: u16 = 0xfff1;

        let mut strtab = vec![0u8];
        let mut name_offsets = Vec::new();
        for (name, _) in symbols {
            name_offsets.push(strtab.len() as u32);
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
        }
        while strtab.len() % 4 != 0 {
            strtab.push(0);
        }

        let mut symtab = vec![0u8; SYM];
        for ((_, value), name) in symbols.iter().zip(&name_offsets) {
            symtab.extend_from_slice(&name.to_le_bytes());
            symtab.extend_from_slice(&value.to_le_bytes());
            symtab.extend_from_slice(&0u32.to_le_bytes());
            symtab.push(0); // STB_LOCAL, STT_NOTYPE
            symtab.push(0);
            symtab.extend_from_slice(&SHN_ABS.to_le_bytes());
        }

        let strtab_off = EHDR;
        let symtab_off = strtab_off + strtab.len();
        let shoff = symtab_off + symtab.len();

        let mut elf = Vec::new();
        elf.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
        elf.extend_from_slice(&[0; 8]);
        elf.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        elf.extend_from_slice(&40u16.to_le_bytes()); // EM_ARM
        elf.extend_from_slice(&1u32.to_le_bytes());
        elf.extend_from_slice(&0u32.to_le_bytes()); // entry
        elf.extend_from_slice(&0u32.to_le_bytes()); // phoff
        elf.extend_from_slice(&(shoff as u32).to_le_bytes());
        elf.extend_from_slice(&0u32.to_le_bytes()); // flags
        elf.extend_from_slice(&(EHDR as u16).to_le_bytes());
        elf.extend_from_slice(&32u16.to_le_bytes());
        elf.extend_from_slice(&0u16.to_le_bytes()); // phnum
        elf.extend_from_slice(&(SHDR as u16).to_le_bytes());
        elf.extend_from_slice(&3u16.to_le_bytes()); // shnum
        elf.extend_from_slice(&0u16.to_le_bytes()); // shstrndx
        assert_eq!(elf.len(), EHDR);

        elf.extend_from_slice(&strtab);
        elf.extend_from_slice(&symtab);

        let section = |elf: &mut Vec<u8>, fields: [u32; 10]| {
            for field in fields {
                elf.extend_from_slice(&field.to_le_bytes());
            }
        };
        section(&mut elf, [0; 10]);
        // SHT_STRTAB
        section(
            &mut elf,
            [0, 3, 0, 0, strtab_off as u32, strtab.len() as u32, 0, 0, 1, 0],
        );
        // SHT_SYMTAB, linked to section 1
        section(
            &mut elf,
            [0, 2, 0, 0, symtab_off as u32, symtab.len() as u32, 1, 1, 4, SYM as u32],
        );
        elf
    }

    fn write_temp(name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("adcstream-{}-{}.elf", name, std::process::id()));
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_load_layout_from_elf_symbols() {
        let elf = elf_with_symbols(&[
            ("_end", 0x2000_0000),
            ("_estack", 0x2000_1400),
            ("_Min_Stack_Size", 0x400),
            ("main", 0x0800_0101),
        ]);
        let path = write_temp("cube", &elf);

        let layout = load_layout(&path).unwrap();
        assert_eq!(layout.heap_start, 0x2000_0000);
        assert_eq!(layout.stack_top, 0x2000_1400);
        assert_eq!(layout.min_stack_size, 0x400);
        assert_eq!(layout.limit(), Some(0x2000_1000));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_layout_reports_missing_symbol() {
        let elf = elf_with_symbols(&[("__sheap", 0x2000_0100), ("_stack_start", 0x2001_8000)]);
        let path = write_temp("partial", &elf);

        let err = load_layout(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("_Min_Stack_Size"));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load_layout(Path::new("non_existent_file.elf")).is_err());
    }
}
