//! IRPanel firmware
//!
//! Firmware for the RC5 infrared receiver / HD44780 panel board
//! (STM32F042K6). Decodes remote-control frames from the IR demodulator
//! and executes display commands received over the UART packet protocol;
//! see `irpanel-protocol` for the wire format.
//!
//! Both producers - the IR decoder and the packet assembler - hand their
//! results to the panel loop through single-slot mailboxes and then stay
//! quiet until the loop acknowledges, mirroring the one-command-in-flight
//! contract the host relies on.

#![no_std]
#![no_main]

mod hd44780;

use core::cell::RefCell;

use defmt::*;
use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_stm32::bind_interrupts;
use embassy_stm32::exti::{self, ExtiInput};
use embassy_stm32::gpio::{Level as PinLevel, Output, OutputType, Pull, Speed};
use embassy_stm32::mode::Async;
use embassy_stm32::peripherals::{TIM1, USART2};
use embassy_stm32::time::khz;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm, SimplePwmChannel};
use embassy_stm32::usart::{self, Uart};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use {defmt_rtt as _, panic_probe as _};

use irpanel_core::{CommandWord, EdgeEvent, Level, Mailbox, PulseTiming, Rc5Decoder};
use irpanel_protocol::{HostCommand, PacketRx, PanelEvent, PACKET_CAPACITY};

use crate::hd44780::Hd44780;

bind_interrupts!(struct Irqs {
    USART2 => usart::InterruptHandler<USART2>;
    EXTI0_1 => exti::InterruptHandler<embassy_stm32::interrupt::typelevel::EXTI0_1>;
});

/// Decoder timer tick, matching the default pulse calibration
const TICK_US: u64 = 32;

/// Initial backlight duty (0-255 scale)
const DIM_INITIAL: u8 = 0x80;

/// Decoded IR command handoff (IR task -> panel loop)
static IR_MAILBOX: Mutex<CriticalSectionRawMutex, RefCell<Mailbox<CommandWord>>> =
    Mutex::new(RefCell::new(Mailbox::new()));

/// Completed host packet handoff (UART RX task -> panel loop)
static CMD_MAILBOX: Mutex<
    CriticalSectionRawMutex,
    RefCell<Mailbox<heapless::Vec<u8, PACKET_CAPACITY>>>,
> = Mutex::new(RefCell::new(Mailbox::new()));

/// Mailbox ready notifications
static IR_READY: Signal<CriticalSectionRawMutex, ()> = Signal::new();
static CMD_READY: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Consumer acknowledgments; producers park until these fire
static IR_NEXT: Signal<CriticalSectionRawMutex, ()> = Signal::new();
static CMD_NEXT: Signal<CriticalSectionRawMutex, ()> = Signal::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("IRPanel firmware starting...");

    let p = embassy_stm32::init(Default::default());

    // HD44780 on PB0 (RS), PB1 (E), PB4-PB7 (D4-D7)
    let mut lcd = Hd44780::new(
        Output::new(p.PB0, PinLevel::Low, Speed::Low),
        Output::new(p.PB1, PinLevel::Low, Speed::Low),
        [
            Output::new(p.PB4, PinLevel::Low, Speed::Low),
            Output::new(p.PB5, PinLevel::Low, Speed::Low),
            Output::new(p.PB6, PinLevel::Low, Speed::Low),
            Output::new(p.PB7, PinLevel::Low, Speed::Low),
        ],
    );
    lcd.init().await;
    info!("LCD initialised");

    // Backlight PWM on TIM1 CH1 (PA8)
    let pwm = SimplePwm::new(
        p.TIM1,
        Some(PwmPin::new_ch1(p.PA8, OutputType::PushPull)),
        None,
        None,
        None,
        khz(1),
        Default::default(),
    );

    // UART to the host (PA2=TX, PA3=RX)
    let mut uart_config = usart::Config::default();
    uart_config.baudrate = 9600;

    let uart = Uart::new(
        p.USART2,
        p.PA3, // RX
        p.PA2, // TX
        Irqs,
        p.DMA1_CH4,
        p.DMA1_CH5,
        uart_config,
    )
    .unwrap();

    let (tx, rx) = uart.split();

    // IR demodulator input (PA0)
    let ir = ExtiInput::new(p.PA0, p.EXTI0, Pull::Up, Irqs);

    // Spawn tasks
    spawner.spawn(ir_task(ir)).unwrap();
    spawner.spawn(uart_rx_task(rx)).unwrap();
    spawner.spawn(panel_task(lcd, pwm, tx)).unwrap();

    info!("All tasks spawned");
}

/// IR receive task - times pin transitions and runs the RC5 decoder
#[embassy_executor::task]
async fn ir_task(mut ir: ExtiInput<'static>) {
    info!("IR task started");

    let mut decoder = Rc5Decoder::new(PulseTiming::default());
    let mut last_edge = Instant::now();

    loop {
        ir.wait_for_any_edge().await;
        let now = Instant::now();
        let ticks = ticks_since(last_edge, now);
        last_edge = now;

        let level = if ir.is_high() {
            Level::High
        } else {
            Level::Low
        };

        if let Some(word) = decoder.feed(EdgeEvent { ticks, level }) {
            debug!("IR frame: addr={} cmd={}", word.address(), word.command());
            IR_MAILBOX.lock(|mb| mb.borrow_mut().post(word));
            IR_READY.signal(());

            // No edge processing until the panel loop acknowledges
            IR_NEXT.wait().await;
            decoder.rearm();
            last_edge = Instant::now();
        }
    }
}

/// Elapsed decoder ticks between two edges, saturating well past the
/// longest valid pulse
fn ticks_since(from: Instant, to: Instant) -> u8 {
    let ticks = (to - from).as_micros() / TICK_US;
    ticks.min(u8::MAX as u64) as u8
}

/// UART receive task - assembles length-prefixed command packets
#[embassy_executor::task]
async fn uart_rx_task(mut rx: usart::UartRx<'static, Async>) {
    info!("UART RX task started");

    let mut assembler = PacketRx::new();
    let mut buf = [0u8; 1];

    loop {
        match rx.read(&mut buf).await {
            Ok(()) => {
                if assembler.feed(buf[0]) {
                    let payload =
                        heapless::Vec::from_slice(assembler.payload().unwrap()).unwrap();
                    CMD_MAILBOX.lock(|mb| mb.borrow_mut().post(payload));
                    CMD_READY.signal(());

                    // Reception is disabled until the panel loop acknowledges
                    CMD_NEXT.wait().await;
                    assembler.rearm();
                }
            }
            Err(e) => {
                warn!("UART read error: {:?}", e);
                Timer::after(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Panel loop - drains both mailboxes, drives the LCD and backlight,
/// reports decoder events and acks every host command
#[embassy_executor::task]
async fn panel_task(
    mut lcd: Hd44780<'static>,
    mut pwm: SimplePwm<'static, TIM1>,
    mut tx: usart::UartTx<'static, Async>,
) {
    info!("Panel task started");

    let mut backlight = pwm.ch1();
    backlight.enable();
    set_backlight(&mut backlight, DIM_INITIAL);

    loop {
        match select(IR_READY.wait(), CMD_READY.wait()).await {
            Either::First(()) => {
                let word = IR_MAILBOX.lock(|mb| mb.borrow().value().copied());
                if let Some(word) = word {
                    let event = PanelEvent::IrCommand {
                        address: word.address(),
                        command: word.command(),
                    };
                    send_packet(&mut tx, &event).await;
                }
                IR_MAILBOX.lock(|mb| mb.borrow_mut().rearm());
                IR_NEXT.signal(());
            }
            Either::Second(()) => {
                let payload = CMD_MAILBOX.lock(|mb| mb.borrow().value().cloned());
                if let Some(payload) = payload {
                    handle_command(&mut lcd, &mut backlight, &payload).await;
                    send_packet(&mut tx, &PanelEvent::Done).await;
                }
                CMD_MAILBOX.lock(|mb| mb.borrow_mut().rearm());
                CMD_NEXT.signal(());
            }
        }
    }
}

/// Execute one host command
async fn handle_command(
    lcd: &mut Hd44780<'_>,
    backlight: &mut SimplePwmChannel<'_, TIM1>,
    payload: &[u8],
) {
    match HostCommand::from_payload(payload) {
        Ok(HostCommand::Clear) => {
            trace!("clear");
            lcd.send_byte(hd44780::cmd::CLEAR, false, true).await;
        }
        Ok(HostCommand::Dim(level)) => {
            trace!("dim {}", level);
            set_backlight(backlight, level);
        }
        Ok(HostCommand::Home) => {
            trace!("home");
            lcd.send_byte(hd44780::cmd::HOME, false, true).await;
        }
        Ok(HostCommand::Goto { x, y }) => {
            trace!("goto ({}, {})", x, y);
            lcd.goto(x, y).await;
        }
        Ok(HostCommand::Print(text)) => {
            trace!("print {} chars", text.len());
            lcd.write_bytes(text).await;
        }
        Ok(HostCommand::Raw {
            data,
            is_char,
            wait,
        }) => {
            trace!("raw {:x}", data);
            lcd.send_byte(data, is_char, wait).await;
        }
        Err(_) => {
            // Unknown packets are still acked so the host does not stall
            warn!("Unknown command packet: {:?}", payload);
        }
    }
}

fn set_backlight(channel: &mut SimplePwmChannel<'_, TIM1>, level: u8) {
    let max = channel.max_duty_cycle() as u32;
    channel.set_duty_cycle((max * level as u32 / 255) as u16);
}

/// Encode and transmit one panel-to-host packet
async fn send_packet(tx: &mut usart::UartTx<'static, Async>, event: &PanelEvent) {
    if let Ok(packet) = event.to_packet() {
        if let Ok(frame) = packet.encode_to_vec() {
            tx.write(&frame).await.ok();
        }
    }
}
