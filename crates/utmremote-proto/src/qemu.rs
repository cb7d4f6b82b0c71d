//! QEMU machine configuration model.
//!
//! Mirrors the configuration tree the host serializes for
//! `GetQEMUConfiguration` and the configuration-changed notification. Every
//! field is optionally-absent: the host omits anything unset, and newer
//! hosts may add fields this model ignores.

use crate::cod::{CodDecode, CodEncode, CodError, Decoder, Encoder};
use crate::vm::{cod_enum, Backend};

cod_enum! {
    /// Role of a drive image.
    pub enum DriveImageType {
        #[allow(missing_docs)]
        None => "none",
        #[allow(missing_docs)]
        Disk => "disk",
        #[allow(missing_docs)]
        Cd => "cd",
        #[allow(missing_docs)]
        Bios => "bios",
        #[allow(missing_docs)]
        LinuxKernel => "linuxKernel",
        #[allow(missing_docs)]
        LinuxInitrd => "linuxInitrd",
        #[allow(missing_docs)]
        LinuxDtb => "linuxDtb",
    }
}

cod_enum! {
    /// Bus a drive is attached to.
    pub enum DriveInterface {
        #[allow(missing_docs)]
        None => "none",
        #[allow(missing_docs)]
        Ide => "ide",
        #[allow(missing_docs)]
        Scsi => "scsi",
        #[allow(missing_docs)]
        Sd => "sd",
        #[allow(missing_docs)]
        Mtd => "mtd",
        #[allow(missing_docs)]
        Floppy => "floppy",
        #[allow(missing_docs)]
        Pflash => "pflash",
        #[allow(missing_docs)]
        Virtio => "virtio",
        #[allow(missing_docs)]
        Nvme => "nvme",
        #[allow(missing_docs)]
        Usb => "usb",
    }
}

cod_enum! {
    /// Host directory sharing mechanism.
    pub enum FileShareMode {
        #[allow(missing_docs)]
        None => "none",
        #[allow(missing_docs)]
        Webdav => "webdav",
        #[allow(missing_docs)]
        Virtfs => "virtfs",
    }
}

cod_enum! {
    /// Guest network attachment mode.
    pub enum NetworkMode {
        #[allow(missing_docs)]
        Emulated => "emulated",
        #[allow(missing_docs)]
        Shared => "shared",
        #[allow(missing_docs)]
        Host => "host",
        #[allow(missing_docs)]
        Bridged => "bridged",
    }
}

cod_enum! {
    /// Port forward transport.
    pub enum NetworkProtocol {
        #[allow(missing_docs)]
        Tcp => "tcp",
        #[allow(missing_docs)]
        Udp => "udp",
    }
}

cod_enum! {
    /// Display scaling filter.
    pub enum Scaler {
        #[allow(missing_docs)]
        Linear => "linear",
        #[allow(missing_docs)]
        Nearest => "nearest",
    }
}

cod_enum! {
    /// Where a serial port is connected.
    pub enum SerialMode {
        #[allow(missing_docs)]
        Builtin => "builtin",
        #[allow(missing_docs)]
        TcpClient => "tcpClient",
        #[allow(missing_docs)]
        TcpServer => "tcpServer",
        #[allow(missing_docs)]
        Ptty => "ptty",
    }
}

cod_enum! {
    /// What a serial port is wired to inside QEMU.
    pub enum SerialTarget {
        #[allow(missing_docs)]
        AutoDevice => "autoDevice",
        #[allow(missing_docs)]
        ManualDevice => "manualDevice",
        #[allow(missing_docs)]
        Gdb => "gdb",
        #[allow(missing_docs)]
        Monitor => "monitor",
    }
}

cod_enum! {
    /// USB controller generation.
    pub enum UsbBus {
        #[allow(missing_docs)]
        Disabled => "disabled",
        #[allow(missing_docs)]
        Usb2_0 => "usb2_0",
        #[allow(missing_docs)]
        Usb3_0 => "usb3_0",
    }
}

/// Generate the configuration-record boilerplate: each field is optional
/// and keyed by its capitalized wire name.
macro_rules! qemu_record {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $($(#[$fmeta:meta])* $field:ident : $ty:ty => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Default)]
        pub struct $name {
            $($(#[$fmeta])* pub $field: Option<$ty>,)+
        }

        impl CodEncode for $name {
            fn encode(&self, enc: &mut Encoder<'_>) {
                enc.record()
                    $(.optional($wire, &self.$field))+
                    .finish();
            }
        }

        impl CodDecode for $name {
            fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
                let rec = dec.record()?;
                Ok(Self {
                    $($field: rec.optional($wire)?,)+
                })
            }
        }
    };
}

qemu_record! {
    /// Package identity and presentation.
    pub struct ConfigurationInfo {
        name: String => "Name",
        icon: String => "Icon",
        icon_custom: bool => "IconCustom",
        notes: String => "Notes",
        uuid: String => "UUID",
    }
}

qemu_record! {
    /// Built-in terminal appearance.
    pub struct TerminalConfiguration {
        theme: String => "Theme",
        foreground_color: String => "ForegroundColor",
        background_color: String => "BackgroundColor",
        font: String => "Font",
        font_size: i64 => "FontSize",
        resize_command: String => "ResizeCommand",
        cursor_blink: bool => "CursorBlink",
    }
}

qemu_record! {
    /// One emulated display.
    pub struct DisplayConfiguration {
        hardware: String => "Hardware",
        vga_ram_mib: i64 => "VgaRamMib",
        dynamic_resolution: bool => "DynamicResolution",
        upscaling_filter: Scaler => "UpscalingFilter",
        downscaling_filter: Scaler => "DownscalingFilter",
        native_resolution: bool => "NativeResolution",
    }
}

qemu_record! {
    /// One drive image.
    pub struct DriveConfiguration {
        image_name: String => "ImageName",
        image_type: DriveImageType => "ImageType",
        interface: DriveInterface => "Interface",
        interface_version: i64 => "InterfaceVersion",
        identifier: String => "Identifier",
        read_only: bool => "ReadOnly",
    }
}

qemu_record! {
    /// Input device wiring.
    pub struct InputConfiguration {
        usb_bus_support: UsbBus => "UsbBusSupport",
        usb_sharing: bool => "UsbSharing",
        maximum_usb_share: i64 => "MaximumUsbShare",
    }
}

qemu_record! {
    /// One forwarded port.
    pub struct PortForwardConfiguration {
        protocol: NetworkProtocol => "Protocol",
        host_address: String => "HostAddress",
        host_port: i64 => "HostPort",
        guest_address: String => "GuestAddress",
        guest_port: i64 => "GuestPort",
    }
}

qemu_record! {
    /// One network adapter.
    pub struct NetworkConfiguration {
        mode: NetworkMode => "Mode",
        hardware: String => "Hardware",
        mac_address: String => "MacAddress",
        isolate_from_host: bool => "IsolateFromHost",
        port_forward: Vec<PortForwardConfiguration> => "PortForward",
        bridge_interface: String => "BridgeInterface",
        vlan_guest_address: String => "VlanGuestAddress",
        vlan_guest_address_ipv6: String => "VlanGuestAddressIPv6",
        vlan_host_address: String => "VlanHostAddress",
        vlan_host_address_ipv6: String => "VlanHostAddressIPv6",
        vlan_dhcp_start_address: String => "VlanDhcpStartAddress",
        vlan_dhcp_end_address: String => "VlanDhcpEndAddress",
        vlan_dhcp_domain: String => "VlanDhcpDomain",
        vlan_dns_server_address: String => "VlanDnsServerAddress",
        vlan_dns_server_address_ipv6: String => "VlanDnsServerAddressIPv6",
        vlan_dns_search_domain: String => "VlanDnsSearchDomain",
        host_net_uuid: String => "HostNetUuid",
    }
}

qemu_record! {
    /// QEMU process options.
    pub struct QemuOptions {
        debug_log: bool => "DebugLog",
        uefi_boot: bool => "UEFIBoot",
        rng_device: bool => "RNGDevice",
        balloon_device: bool => "BalloonDevice",
        tpm_device: bool => "TPMDevice",
        hypervisor: bool => "Hypervisor",
        tso: bool => "TSO",
        rtc_local_time: bool => "RTCLocalTime",
        ps2_controller: bool => "PS2Controller",
        machine_property_override: String => "MachinePropertyOverride",
        additional_arguments: Vec<String> => "AdditionalArguments",
    }
}

qemu_record! {
    /// One serial port.
    pub struct SerialConfiguration {
        mode: SerialMode => "Mode",
        target: SerialTarget => "Target",
        terminal: TerminalConfiguration => "Terminal",
        hardware: String => "Hardware",
        tcp_host_address: String => "TcpHostAddress",
        tcp_port: i64 => "TcpPort",
        wait_for_connection: bool => "WaitForConnection",
        remote_connection_allowed: bool => "RemoteConnectionAllowed",
    }
}

qemu_record! {
    /// Host integration sharing options.
    pub struct SharingConfiguration {
        directory_share_mode: FileShareMode => "DirectoryShareMode",
        directory_share_read_only: bool => "DirectoryShareReadOnly",
        clipboard_sharing: bool => "ClipboardSharing",
    }
}

qemu_record! {
    /// One sound device.
    pub struct SoundConfiguration {
        hardware: String => "Hardware",
    }
}

qemu_record! {
    /// CPU and memory topology.
    pub struct SystemConfiguration {
        architecture: String => "Architecture",
        target: String => "Target",
        cpu: String => "CPU",
        cpu_flags_add: Vec<String> => "CPUFlagsAdd",
        cpu_flags_remove: Vec<String> => "CPUFlagsRemove",
        cpu_count: i64 => "CPUCount",
        force_multicore: bool => "ForceMulticore",
        memory_size: i64 => "MemorySize",
        jit_cache_size: i64 => "JITCacheSize",
    }
}

qemu_record! {
    /// A machine's full QEMU configuration.
    pub struct QemuConfiguration {
        information: ConfigurationInfo => "Information",
        system: SystemConfiguration => "System",
        qemu: QemuOptions => "QEMU",
        input: InputConfiguration => "Input",
        sharing: SharingConfiguration => "Sharing",
        display: Vec<DisplayConfiguration> => "Display",
        drive: Vec<DriveConfiguration> => "Drive",
        network: Vec<NetworkConfiguration> => "Network",
        serial: Vec<SerialConfiguration> => "Serial",
        sound: Vec<SoundConfiguration> => "Sound",
        backend: Backend => "Backend",
        configuration_version: i64 => "ConfigurationVersion",
    }
}
