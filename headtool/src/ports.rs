use serialport::SerialPortType;

#[derive(clap::Args, Debug)]
pub struct PortsOpts {}

impl crate::ToolRun for PortsOpts {
    fn run(&self) -> anyhow::Result<()> {
        let ports = serialport::available_ports()?;
        if ports.is_empty() {
            eprintln!("No serial ports found.");
            return Ok(());
        }

        let default = headlib::default_serial_port();
        for info in ports {
            let marker = if info.port_name == default { '*' } else { ' ' };
            println!("{} {:<24} {}", marker, info.port_name, describe(&info.port_type));
        }
        Ok(())
    }
}

fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let mut s = format!("usb {:04x}:{:04x}", usb.vid, usb.pid);
            for part in [&usb.manufacturer, &usb.product, &usb.serial_number]
                .into_iter()
                .flatten()
            {
                s.push(' ');
                s.push_str(part);
            }
            s
        }
        SerialPortType::PciPort => "pci".to_owned(),
        SerialPortType::BluetoothPort => "bluetooth".to_owned(),
        SerialPortType::Unknown => String::new(),
    }
}
