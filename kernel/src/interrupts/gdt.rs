//! Global descriptor table: null, kernel code/data, user code/data.
//! Interrupt gates and thread frames rely on the resulting selectors
//! (kernel code 0x08, kernel data 0x10).

use lazy_static::lazy_static;
use log::debug;
use x86_64::instructions::segmentation::{Segment, CS, DS, ES, SS};
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt: GlobalDescriptorTable = GlobalDescriptorTable::empty();

        let code_selector = gdt.append(Descriptor::kernel_code_segment());
        let data_selector = gdt.append(Descriptor::kernel_data_segment());
        let user_code_selector = gdt.append(Descriptor::user_code_segment());
        let user_data_selector = gdt.append(Descriptor::user_data_segment());

        (
            gdt,
            Selectors {
                code_selector,
                data_selector,
                user_code_selector,
                user_data_selector,
            },
        )
    };
}

#[derive(Debug)]
struct Selectors {
    code_selector: SegmentSelector,
    data_selector: SegmentSelector,
    #[allow(dead_code)]
    user_code_selector: SegmentSelector,
    #[allow(dead_code)]
    user_data_selector: SegmentSelector,
}

pub fn init() {
    GDT.0.load();

    unsafe {
        CS::set_reg(GDT.1.code_selector);
        DS::set_reg(GDT.1.data_selector);
        ES::set_reg(GDT.1.data_selector);
        SS::set_reg(GDT.1.data_selector);
    }

    debug!(
        "GDT loaded, kernel CS={:#x} DS={:#x}",
        GDT.1.code_selector.0, GDT.1.data_selector.0
    );
}
