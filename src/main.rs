use fluidx::window::App;
use fluidx::{FluidConfig, FluidError};
use winit::event_loop::{ControlFlow, EventLoop};

fn run() -> Result<(), FluidError> {
    let config = FluidConfig::from_args(std::env::args().skip(1));
    config.validate()?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
