use std::path::PathBuf;

use bytesize::ByteSize;
use clap::{Parser, Subcommand, ValueEnum};
use pmem_planner::{InterleaveFormat, InterleaveSize};

#[derive(Clone, Debug, Parser)]
#[command(about)]
pub struct Cli {
    /// Path to the inventory snapshot to plan against, in YAML format.
    ///
    /// The snapshot describes the platform capabilities, the installed Dimms, the configured pools and any existing
    /// namespaces.
    #[arg(long)]
    pub snapshot: PathBuf,

    /// Path to the planner configuration file, in YAML format.
    ///
    /// Settings can also be supplied, or overridden, through `PMEM_`-prefixed environment variables.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Finds the largest set of interleavable Dimms on a socket.
    DimmSet {
        /// Socket to consider.
        #[arg(long, default_value_t = 0)]
        socket: u16,
    },

    /// Runs the memory allocation layout pipeline over every installed Dimm.
    Layout {
        /// Set aside one Dimm as the reserve device.
        #[arg(long)]
        reserve_dimm: bool,
    },

    /// Shows the range of App Direct namespace sizes a pool can host.
    Ranges {
        /// Pool uid.
        #[arg(long)]
        pool: String,

        /// Only consider interleave sets this many Dimms wide.
        #[arg(long)]
        ways: Option<u8>,
    },

    /// Creates an App Direct namespace.
    Create {
        /// Pool uid.
        #[arg(long)]
        pool: String,

        /// Namespace capacity, e.g. `64GiB`.
        #[arg(long)]
        capacity: ByteSize,

        /// Friendly name. Synthesized from the configured prefix if omitted.
        #[arg(long)]
        name: Option<String>,

        #[command(flatten)]
        format: FormatArgs,

        /// Round the capacity down to the nearest valid size instead of rejecting it.
        #[arg(long)]
        adjust: bool,
    },

    /// Changes the capacity of a namespace.
    Resize {
        /// Namespace uid.
        #[arg(long)]
        namespace: String,

        /// New capacity, e.g. `64GiB`.
        #[arg(long)]
        capacity: ByteSize,

        /// Round the capacity down to the nearest valid size instead of rejecting it.
        #[arg(long)]
        adjust: bool,
    },

    /// Deletes a namespace.
    Delete {
        /// Namespace uid.
        #[arg(long)]
        namespace: String,
    },
}

/// Interleave format a new namespace must be placed on.
#[derive(Clone, Debug, clap::Args)]
pub struct FormatArgs {
    /// Number of interleaved Dimms.
    #[arg(long)]
    pub ways: Option<u8>,

    /// Channel interleave size.
    #[arg(long, value_enum, requires = "ways")]
    pub channel: Option<InterleaveSizeArg>,

    /// Memory controller interleave size.
    #[arg(long, value_enum, requires = "ways")]
    pub imc: Option<InterleaveSizeArg>,
}

impl FormatArgs {
    pub fn to_format(&self) -> Option<InterleaveFormat> {
        self.ways.map(|ways| InterleaveFormat {
            ways,
            channel: self.channel.map(Into::into).unwrap_or_default(),
            imc: self.imc.map(Into::into).unwrap_or_default(),
        })
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum InterleaveSizeArg {
    #[value(name = "64b")]
    Size64B,
    #[value(name = "128b")]
    Size128B,
    #[value(name = "256b")]
    Size256B,
    #[value(name = "4kib")]
    Size4KiB,
    #[value(name = "1gib")]
    Size1GiB,
}

impl From<InterleaveSizeArg> for InterleaveSize {
    fn from(value: InterleaveSizeArg) -> Self {
        match value {
            InterleaveSizeArg::Size64B => InterleaveSize::Size64B,
            InterleaveSizeArg::Size128B => InterleaveSize::Size128B,
            InterleaveSizeArg::Size256B => InterleaveSize::Size256B,
            InterleaveSizeArg::Size4KiB => InterleaveSize::Size4KiB,
            InterleaveSizeArg::Size1GiB => InterleaveSize::Size1GiB,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_with_format() {
        let cli = Cli::try_parse_from([
            "pmem-plan",
            "--snapshot",
            "inventory.yaml",
            "create",
            "--pool",
            "pool-0",
            "--capacity",
            "64GiB",
            "--ways",
            "4",
            "--channel",
            "4kib",
        ])
        .unwrap();

        let Command::Create {
            pool, capacity, format, ..
        } = cli.command
        else {
            panic!("expected create command");
        };
        assert_eq!(pool, "pool-0");
        assert_eq!(capacity.as_u64(), 64 << 30);
        assert_eq!(
            format.to_format(),
            Some(InterleaveFormat {
                ways: 4,
                channel: InterleaveSize::Size4KiB,
                imc: InterleaveSize::Unknown,
            })
        );
    }

    #[test]
    fn interleave_sizes_require_ways() {
        let result = Cli::try_parse_from([
            "pmem-plan",
            "--snapshot",
            "inventory.yaml",
            "create",
            "--pool",
            "pool-0",
            "--capacity",
            "64GiB",
            "--imc",
            "4kib",
        ]);
        assert!(result.is_err());
    }
}
