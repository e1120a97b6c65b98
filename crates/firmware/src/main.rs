#![no_std]
#![no_main]

mod board;

use core::ptr::addr_of;

use adcstream_core::acquisition::error_handler;
use adcstream_core::allocator::SbrkAllocator;
use adcstream_core::{Acquisition, AcquisitionSettings, HeapLayout};
use cortex_m_rt::entry;
use panic_halt as _;
use stm32f4xx_hal::adc::config::AdcConfig;
use stm32f4xx_hal::adc::Adc;
use stm32f4xx_hal::{pac, prelude::*};

use board::{BoardAdc, BoardSerial};

#[global_allocator]
static HEAP: SbrkAllocator = SbrkAllocator::empty();

extern "C" {
    // Provided by cortex-m-rt's link.x and memory.x.
    static __sheap: u8;
    static _stack_start: u8;
    static _Min_Stack_Size: u8;
}

fn heap_layout() -> HeapLayout {
    unsafe {
        HeapLayout::new(
            addr_of!(__sheap) as usize,
            addr_of!(_stack_start) as usize,
            // The symbol's address is the reservation size.
            addr_of!(_Min_Stack_Size) as usize,
        )
    }
}

#[entry]
fn main() -> ! {
    // SAFETY: the linker hands everything above `__sheap` to the heap and stack.
    if unsafe { HEAP.init(heap_layout()) }.is_err() {
        error_handler();
    }

    let (Some(dp), Some(cp)) = (pac::Peripherals::take(), cortex_m::Peripherals::take()) else {
        error_handler();
    };

    let rcc = dp.RCC.constrain();
    let clocks = rcc.cfgr.sysclk(84.MHz()).pclk1(42.MHz()).freeze();
    let delay = cp.SYST.delay(&clocks);

    let gpioa = dp.GPIOA.split();
    let adc = BoardAdc::new(
        Adc::adc1(dp.ADC1, true, AdcConfig::default()),
        gpioa.pa0.into_analog(),
        &clocks,
    );
    let serial = BoardSerial::new(dp.USART2, gpioa.pa2, &clocks);

    Acquisition::new(adc, serial, delay, AcquisitionSettings::default()).run()
}
