//! Registers of the module are accessed through the PCI local
//! space (Addr8). All registers are 32bit wide, so the address
//! of the next register is the previous one + 4.
//!
//! Bit positions which share a register are given as shifts.
//! Anything that depends on the hardware layout lives here and
//! nowhere else.

//========== Hardware limits ============
//
//=======================================

pub const MAX_SLOTS              : usize = 15;
pub const MAX_CHANNELS           : usize = 32;
pub const MAX_ADC_TRACE_LENGTH   : usize = 8192;
pub const LARGE_HISTOGRAM_LENGTH : usize = 32768;
pub const IO_BUFFER_LENGTH       : usize = 65536;
/// size of the external FIFO in words
pub const FIFO_SIZE_WORDS        : usize = 131072;
/// largest single DMA block in words
pub const MAX_DMA_BLOCK_SIZE     : usize = 8192;
/// PCI bus data rate in MB/s
pub const PCI_BUS_DATARATE       : usize = 100;

pub const SLOWFILTERRANGE_MIN    : u32 = 1;
pub const SLOWFILTERRANGE_MAX    : u32 = 6;
pub const FASTFILTERRANGE_MIN    : u32 = 0;
pub const FASTFILTERRANGE_MAX    : u32 = 0;

//========== Board revisions ============
//
//=======================================

pub const REV_A : u32 = 10;
pub const REV_B : u32 = 11;
pub const REV_C : u32 = 12;
pub const REV_D : u32 = 13;
pub const REV_E : u32 = 14;
pub const REV_F : u32 = 15;
pub const REV_G : u32 = 16;
pub const REV_H : u32 = 17;
pub const REV_I : u32 = 18;

pub fn revision_label(revision : u32) -> char {
  if (REV_A..=REV_I).contains(&revision) {
    (b'A' + (revision - REV_A) as u8) as char
  } else {
    '?'
  }
}

//========== CPLD / configuration =======
//
//=======================================

pub const CFG_DATACS     : u32 = 0x00; // FPGA configuration data, one word at a time
pub const CFG_CTRLCS     : u32 = 0x04; // CPLD control (select/program lines, pull-ups)
pub const CFG_RDCS       : u32 = 0x08; // CPLD status (init/done lines)
pub const CFG_RDVER      : u32 = 0x0c; // CPLD version
pub const CFG_DCMRST     : u32 = 0x14; // DCM reset
pub const CFG_DAC        : u32 = 0x18; // offset DAC, mainboard revisions

/// value the CPLD control shadow resets to
pub const CFG_CTRLCS_DEFAULT : u32 = 0xaaa;

// CFG_CTRLCS bits
pub const CPLDCSR_SEL_SYS      : u32 = 0;
pub const CPLDCSR_PROGB_SYS    : u32 = 1;
pub const CPLDCSR_SEL_FIPPI_0  : u32 = 4;
pub const CPLDCSR_PROGB_FIPPI_0: u32 = 5;
pub const CPLDCSR_SEL_FIPPI_1  : u32 = 6;
pub const CPLDCSR_PROGB_FIPPI_1: u32 = 7;
pub const CPLDCSR_SEL_FIPPI_2  : u32 = 8;
pub const CPLDCSR_PROGB_FIPPI_2: u32 = 9;
pub const CPLDCSR_SEL_FIPPI_3  : u32 = 10;
pub const CPLDCSR_PROGB_FIPPI_3: u32 = 11;
pub const CPLDCSR_BPCONNECT    : u32 = 12;
pub const CPLDCSR_PULLUP       : u32 = 13;

// CFG_RDCS bits
pub const RDCS_SYS_INIT        : u32 = 1 << 16;
pub const RDCS_SYS_DONE        : u32 = 1 << 17;
pub const RDCS_FIPPI_INIT      : u32 = 1 << 18;
pub const RDCS_FIPPI_DONE      : u32 = 1 << 19;

//========== System FPGA ================
//
//=======================================

pub const CSR             : u32 = 0x48;  // control & status
pub const EXT_MEM_TEST    : u32 = 0xc4;  // DSP memory address
pub const WRT_DSP_MMA     : u32 = 0xc8;  // DSP memory data, auto increments the address
pub const SET_EXT_FIFO    : u32 = 0xcc;  // words to move into the DMA window
pub const RD_WRT_FIFO_WML : u32 = 0xe8;  // external FIFO level (watermark)
pub const WRT_RESET_RFCNT : u32 = 0xf4;  // reset the FIFO word counter

// CSR bits
pub const CSR_RUNENA           : u32 = 0;
pub const CSR_DSPDOWNLOAD      : u32 = 1;
pub const CSR_PCIACTIVE        : u32 = 2;
pub const CSR_PULLUP_CTRL      : u32 = 3;
pub const CSR_DSPRESET         : u32 = 4;
pub const CSR_EXTFIFO_WML      : u32 = 6;
pub const CSR_DSPINITDONE      : u32 = 7;
pub const CSR_RUNACTIVE        : u32 = 13;
pub const CSR_CLREXTMEM_ACTIVE : u32 = 15;

// MODCSRB bits
pub const MODCSRB_CPLDPULLUP    : u32 = 0;
pub const MODCSRB_DIRMOD        : u32 = 4;
pub const MODCSRB_CHASSISMASTER : u32 = 6;

//========== Memory windows =============
//
//=======================================

pub const IO_BUFFER_ADDR : u32 = 0x00050000;
pub const FIFO_MEM_DMA   : u32 = 0x00200000;
pub const DSP_MEM_DMA    : u32 = 0x00300000;
pub const MCA_MEM_DATA   : u32 = 0x00400000;

// FIPPI window, reached through the DSP address/data pair
pub const ADCCTRL        : u32 = 0x00800404;
pub const FIPPI_DAC      : u32 = 0x00800007;

/// Test a bit of a register value
pub fn test_bit(bit : u32, value : u32) -> bool {
  (value & (1 << bit)) != 0
}
